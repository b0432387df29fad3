//! Tabular GLOF prediction from sensor readings
//!
//! A trained tabular classifier is used when one is installed; otherwise the
//! probability comes from a weighted heuristic over four key readings. The
//! [`SensorSimulator`] supplies drifting virtual readings when no input is
//! given.

use crate::config::PredictorConfig;
use crate::core::risk::{probability_risk_table, GLOF_PROBABILITY};
use crate::types::{round_to, FeatureVector, GlofError, GlofResult, RiskLevel};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Sensor channels in model input order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SensorField {
    #[serde(rename = "Lake_Size_km2")]
    LakeSize,
    #[serde(rename = "Water_Level_m")]
    WaterLevel,
    #[serde(rename = "Air_Temperature_C")]
    AirTemperature,
    #[serde(rename = "Flow_Rate_m3_per_s")]
    FlowRate,
    #[serde(rename = "Ground_Movement_mm")]
    GroundMovement,
    #[serde(rename = "Dam_Pressure_MPa")]
    DamPressure,
    #[serde(rename = "Precipitation_mm")]
    Precipitation,
    #[serde(rename = "Sensor_Accuracy_%", alias = "Sensor_Accuracy_percent")]
    SensorAccuracy,
    #[serde(rename = "Lake_Perimeter_Change_m")]
    LakePerimeterChange,
    #[serde(rename = "Snowpack_Thickness_m")]
    SnowpackThickness,
    #[serde(rename = "Soil_Moisture_Content_%", alias = "Soil_Moisture_Content_percent")]
    SoilMoisture,
    #[serde(rename = "Solar_Radiation_W_per_m2")]
    SolarRadiation,
    #[serde(rename = "Water_Temperature_C")]
    WaterTemperature,
    #[serde(rename = "Water_Turbidity_NTU")]
    WaterTurbidity,
    #[serde(rename = "Wind_Speed_m_per_s")]
    WindSpeed,
    #[serde(rename = "Rainfall_mm")]
    Rainfall,
    #[serde(rename = "Snowfall_mm")]
    Snowfall,
}

use SensorField::*;

impl SensorField {
    pub const ALL: [SensorField; 17] = [
        LakeSize,
        WaterLevel,
        AirTemperature,
        FlowRate,
        GroundMovement,
        DamPressure,
        Precipitation,
        SensorAccuracy,
        LakePerimeterChange,
        SnowpackThickness,
        SoilMoisture,
        SolarRadiation,
        WaterTemperature,
        WaterTurbidity,
        WindSpeed,
        Rainfall,
        Snowfall,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LakeSize => "Lake_Size_km2",
            WaterLevel => "Water_Level_m",
            AirTemperature => "Air_Temperature_C",
            FlowRate => "Flow_Rate_m3_per_s",
            GroundMovement => "Ground_Movement_mm",
            DamPressure => "Dam_Pressure_MPa",
            Precipitation => "Precipitation_mm",
            SensorAccuracy => "Sensor_Accuracy_%",
            LakePerimeterChange => "Lake_Perimeter_Change_m",
            SnowpackThickness => "Snowpack_Thickness_m",
            SoilMoisture => "Soil_Moisture_Content_%",
            SolarRadiation => "Solar_Radiation_W_per_m2",
            WaterTemperature => "Water_Temperature_C",
            WaterTurbidity => "Water_Turbidity_NTU",
            WindSpeed => "Wind_Speed_m_per_s",
            Rainfall => "Rainfall_mm",
            Snowfall => "Snowfall_mm",
        }
    }

    /// Alternate spelling accepted on input, for names that carry `%`
    pub fn alias(&self) -> Option<&'static str> {
        match self {
            SensorAccuracy => Some("Sensor_Accuracy_percent"),
            SoilMoisture => Some("Soil_Moisture_Content_percent"),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.name() == name || f.alias() == Some(name))
    }

    /// Starting value of the simulated reading
    pub fn baseline(&self) -> f64 {
        match self {
            LakeSize => 1.5,
            WaterLevel => 10.0,
            AirTemperature => 15.0,
            FlowRate => 100.0,
            GroundMovement => 2.0,
            DamPressure => 1.0,
            Precipitation => 50.0,
            SensorAccuracy => 95.0,
            LakePerimeterChange => 5.0,
            SnowpackThickness => 2.5,
            SoilMoisture => 30.0,
            SolarRadiation => 300.0,
            WaterTemperature => 12.5,
            WaterTurbidity => 5.0,
            WindSpeed => 10.0,
            Rainfall => 75.0,
            Snowfall => 25.0,
        }
    }
}

/// One complete set of sensor readings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorReadings(BTreeMap<SensorField, f64>);

impl SensorReadings {
    pub fn baseline() -> Self {
        Self(SensorField::ALL.iter().map(|f| (*f, f.baseline())).collect())
    }

    pub fn get(&self, field: SensorField) -> f64 {
        self.0.get(&field).copied().unwrap_or_else(|| field.baseline())
    }

    pub fn set(&mut self, field: SensorField, value: f64) {
        self.0.insert(field, value);
    }

    /// Overlay named readings; canonical names and aliases are accepted
    pub fn merge_named(&mut self, values: &HashMap<String, f64>) -> GlofResult<()> {
        for (name, value) in values {
            let field = SensorField::from_name(name)
                .ok_or_else(|| GlofError::InvalidInput(format!("unknown sensor field: {}", name)))?;
            if !value.is_finite() {
                return Err(GlofError::InvalidInput(format!("non-finite value for {}", name)));
            }
            self.set(field, *value);
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (SensorField, f64)> + '_ {
        self.0.iter().map(|(f, v)| (*f, *v))
    }

    pub fn to_features(&self) -> FeatureVector {
        let mut features = FeatureVector::new();
        for (field, value) in self.iter() {
            features.insert(field.name(), value);
        }
        features
    }
}

/// Drifting virtual sensor state.
///
/// Each call to [`advance`](Self::advance) perturbs every reading and keeps
/// the result as the next baseline. The simulator is single-writer: callers
/// sharing one instance across threads must wrap it in a lock.
#[derive(Debug, Clone)]
pub struct SensorSimulator {
    readings: SensorReadings,
    step: f64,
}

impl SensorSimulator {
    pub fn new(step: f64) -> Self {
        Self::from_readings(SensorReadings::baseline(), step)
    }

    pub fn from_readings(readings: SensorReadings, step: f64) -> Self {
        Self {
            readings,
            step: step.abs(),
        }
    }

    pub fn current(&self) -> &SensorReadings {
        &self.readings
    }

    /// Drift every reading by an independent uniform step, floored at zero
    pub fn advance<R: Rng>(&mut self, rng: &mut R) -> SensorReadings {
        for field in SensorField::ALL {
            let change = if self.step > 0.0 {
                rng.gen_range(-self.step..=self.step)
            } else {
                0.0
            };
            let value = (self.readings.get(field) + change).max(0.0);
            self.readings.set(field, value);
        }
        self.readings.clone()
    }
}

/// A trained classifier over sensor readings
pub trait TabularClassifier: Send + Sync {
    /// Probability of a GLOF event in [0, 1]
    fn predict_proba(&self, readings: &SensorReadings) -> GlofResult<f64>;

    /// Global importance weight per canonical sensor name
    fn feature_importance(&self) -> GlofResult<BTreeMap<String, f64>>;
}

/// Where a prediction's probability came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionSource {
    Classifier,
    Heuristic,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    /// Percent in [0, 100]
    pub probability: f64,
    pub risk_level: RiskLevel,
    pub risk_message: String,
    pub top_contributing_factors: Vec<String>,
    pub sensor_values: SensorReadings,
    pub source: PredictionSource,
}

impl Prediction {
    pub fn to_presentation(&self) -> Self {
        Self {
            probability: round_to(self.probability, 2),
            ..self.clone()
        }
    }
}

const DEFAULT_TOP_FACTORS: [SensorField; 3] = [WaterLevel, FlowRate, GroundMovement];

/// Weighted combination of the four key readings, before noise
pub fn heuristic_probability(readings: &SensorReadings) -> f64 {
    let water = (readings.get(WaterLevel) / 20.0).min(1.0);
    let flow = (readings.get(FlowRate) / 200.0).min(1.0);
    let movement = (readings.get(GroundMovement) / 10.0).min(1.0);
    let precipitation = (readings.get(Precipitation) / 100.0).min(1.0);
    water * 0.3 + flow * 0.25 + movement * 0.25 + precipitation * 0.2
}

/// The three highest-weighted names; ties keep name order
pub fn top_factors(importance: &BTreeMap<String, f64>) -> Vec<String> {
    let mut ranked: Vec<(&String, f64)> = importance.iter().map(|(k, v)| (k, *v)).collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.into_iter().take(3).map(|(k, _)| k.clone()).collect()
}

pub struct GlofPredictor {
    config: PredictorConfig,
    simulator: SensorSimulator,
    classifier: Option<Box<dyn TabularClassifier>>,
}

impl GlofPredictor {
    pub fn new(config: PredictorConfig) -> Self {
        let simulator = SensorSimulator::new(config.sensor_step);
        Self {
            config,
            simulator,
            classifier: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn TabularClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_simulator(mut self, simulator: SensorSimulator) -> Self {
        self.simulator = simulator;
        self
    }

    pub fn simulator(&self) -> &SensorSimulator {
        &self.simulator
    }

    /// Advance the simulator and return the new readings
    pub fn simulate<R: Rng>(&mut self, rng: &mut R) -> SensorReadings {
        self.simulator.advance(rng)
    }

    pub fn predict(&mut self, input: &HashMap<String, f64>) -> GlofResult<Prediction> {
        self.predict_with_rng(input, &mut rand::thread_rng())
    }

    /// Predict from partial readings merged over the current baseline.
    ///
    /// An empty input advances the simulator and predicts on the new readings.
    pub fn predict_with_rng<R: Rng>(
        &mut self,
        input: &HashMap<String, f64>,
        rng: &mut R,
    ) -> GlofResult<Prediction> {
        let readings = if input.is_empty() {
            self.simulator.advance(rng)
        } else {
            let mut readings = self.simulator.current().clone();
            readings.merge_named(input)?;
            readings
        };
        self.predict_readings(readings, rng)
    }

    pub fn predict_readings<R: Rng>(
        &self,
        readings: SensorReadings,
        rng: &mut R,
    ) -> GlofResult<Prediction> {
        let (probability, top_contributing_factors, source) = match &self.classifier {
            Some(classifier) => {
                let p = classifier.predict_proba(&readings)?;
                if !(0.0..=1.0).contains(&p) {
                    return Err(GlofError::Classifier(format!("probability out of range: {}", p)));
                }
                let factors = top_factors(&classifier.feature_importance()?);
                (p, factors, PredictionSource::Classifier)
            }
            None => {
                let noise = if self.config.heuristic_noise > 0.0 {
                    let w = self.config.heuristic_noise;
                    rng.gen_range(-w..=w)
                } else {
                    0.0
                };
                let p = (heuristic_probability(&readings) + noise).clamp(0.0, 1.0);
                let factors = DEFAULT_TOP_FACTORS.iter().map(|f| f.name().to_string()).collect();
                (p, factors, PredictionSource::Heuristic)
            }
        };
        log::debug!("Tabular prediction {:.4} from {:?}", probability, source);

        let risk = probability_risk_table().evaluate(&FeatureVector::new().with(GLOF_PROBABILITY, probability));
        Ok(Prediction {
            probability: probability * 100.0,
            risk_level: risk.risk_level,
            risk_message: risk.message,
            top_contributing_factors,
            sensor_values: readings,
            source,
        })
    }
}

impl Default for GlofPredictor {
    fn default() -> Self {
        Self::new(PredictorConfig::default())
    }
}
