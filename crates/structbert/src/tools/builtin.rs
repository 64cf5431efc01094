use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use super::registry::{ToolDefinition, ToolExecutor};
use super::schema::{FieldType, ToolSchema};

const MIN_FAHRENHEIT: f64 = 32.0;
const MAX_FAHRENHEIT: f64 = 90.0;

/// The tools this service offers out of the box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
pub enum BuiltinTool {
    #[strum(serialize = "weather")]
    Weather,
    #[strum(serialize = "convertFahrenheitToCelsius")]
    ConvertFahrenheitToCelsius,
}

#[derive(Debug, Deserialize)]
struct WeatherInput {
    location: String,
}

#[derive(Debug, Serialize)]
struct WeatherReport {
    location: String,
    temperature: i64,
}

#[derive(Debug, Deserialize)]
struct ConversionInput {
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ConversionResult {
    celsius: i64,
}

impl BuiltinTool {
    pub fn all() -> impl Iterator<Item = BuiltinTool> {
        BuiltinTool::iter()
    }

    pub fn description(&self) -> &'static str {
        match self {
            BuiltinTool::Weather => "Get the weather in a location (fahrenheit)",
            BuiltinTool::ConvertFahrenheitToCelsius => {
                "Convert a temperature in fahrenheit to celsius"
            }
        }
    }

    pub fn schema(&self) -> ToolSchema {
        match self {
            BuiltinTool::Weather => ToolSchema::new().required(
                "location",
                FieldType::String,
                "The location to get the weather for",
            ),
            BuiltinTool::ConvertFahrenheitToCelsius => ToolSchema::new().required(
                "temperature",
                FieldType::Number,
                "The temperature in fahrenheit to convert",
            ),
        }
    }

    pub fn definition(self) -> ToolDefinition {
        ToolDefinition::new(self.to_string(), self.description(), self.schema(), Arc::new(self))
    }

    fn run(&self, input: Value) -> anyhow::Result<Value> {
        let output = match self {
            BuiltinTool::Weather => {
                let WeatherInput { location } = serde_json::from_value(input)?;
                let temperature = sample_temperature(&mut rand::thread_rng());
                serde_json::to_value(WeatherReport {
                    location,
                    temperature,
                })?
            }
            BuiltinTool::ConvertFahrenheitToCelsius => {
                let ConversionInput { temperature } = serde_json::from_value(input)?;
                serde_json::to_value(ConversionResult {
                    celsius: fahrenheit_to_celsius(temperature),
                })?
            }
        };
        Ok(output)
    }
}

#[async_trait]
impl ToolExecutor for BuiltinTool {
    async fn execute(&self, input: Value) -> anyhow::Result<Value> {
        self.run(input)
    }
}

/// A pseudo-random whole-degree temperature in [32, 90] °F
pub fn sample_temperature<R: Rng + ?Sized>(rng: &mut R) -> i64 {
    (rng.gen::<f64>() * (MAX_FAHRENHEIT - MIN_FAHRENHEIT) + MIN_FAHRENHEIT).round() as i64
}

/// Whole-degree Celsius, with halves rounded up (27.5 °F is -2 °C, not -3)
pub fn fahrenheit_to_celsius(fahrenheit: f64) -> i64 {
    ((fahrenheit - 32.0) * (5.0 / 9.0) + 0.5).floor() as i64
}
