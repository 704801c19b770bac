//! Current weather via the Open-Meteo geocoding and forecast APIs.

use std::time::Duration;

use async_trait::async_trait;
use proto::{ParamSpec, ParamType, ToolError, ToolSchema};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::{SessionContext, Tool, ToolHandler, ToolOutput, parse_args};

pub const DEFAULT_GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
pub const DEFAULT_FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
const HTTP_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Deserialize)]
struct WeatherArgs {
    city: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<GeocodingPlace>,
}

#[derive(Debug, Deserialize)]
struct GeocodingPlace {
    name: String,
    #[serde(default)]
    country: String,
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    current: CurrentWeather,
}

#[derive(Debug, Default, Deserialize)]
struct CurrentWeather {
    temperature_2m: Option<f64>,
    apparent_temperature: Option<f64>,
    weather_code: Option<i64>,
    wind_speed_10m: Option<f64>,
}

/// `get_weather`
pub struct WeatherTool {
    client: reqwest::Client,
    geocoding_url: String,
    forecast_url: String,
    default_city: String,
}

impl WeatherTool {
    pub fn new(
        geocoding_url: impl Into<String>,
        forecast_url: impl Into<String>,
        default_city: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            geocoding_url: geocoding_url.into(),
            forecast_url: forecast_url.into(),
            default_city: default_city.into(),
        }
    }

    async fn geocode(&self, city: &str) -> Result<Option<GeocodingPlace>, ToolError> {
        let resp: GeocodingResponse = self
            .client
            .get(&self.geocoding_url)
            .query(&[("name", city), ("count", "1"), ("language", "zh")])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ToolError::ExecutionFailed(format!("geocoding request failed: {e}")))?
            .json()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("invalid geocoding response: {e}")))?;
        Ok(resp.results.into_iter().next())
    }

    async fn current(&self, place: &GeocodingPlace) -> Result<CurrentWeather, ToolError> {
        let resp: ForecastResponse = self
            .client
            .get(&self.forecast_url)
            .query(&[
                ("latitude", place.latitude.to_string()),
                ("longitude", place.longitude.to_string()),
                (
                    "current",
                    "temperature_2m,apparent_temperature,weather_code,wind_speed_10m".to_string(),
                ),
                ("timezone", "auto".to_string()),
            ])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ToolError::ExecutionFailed(format!("forecast request failed: {e}")))?
            .json()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("invalid forecast response: {e}")))?;
        Ok(resp.current)
    }
}

/// WMO weather interpretation codes, grouped.
fn describe_code(code: i64) -> &'static str {
    match code {
        0 => "晴",
        1..=3 => "多云",
        45 | 48 => "雾",
        51..=57 => "毛毛雨",
        61..=67 | 80..=82 => "雨",
        71..=77 | 85 | 86 => "雪",
        95..=99 => "雷暴",
        _ => "未知",
    }
}

#[async_trait]
impl ToolHandler for WeatherTool {
    async fn execute(
        &self,
        args: Map<String, Value>,
        _ctx: SessionContext,
    ) -> Result<ToolOutput, ToolError> {
        let parsed: WeatherArgs = parse_args(args)?;
        let city = parsed
            .city
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| self.default_city.clone());

        let place = self
            .geocode(&city)
            .await?
            .ok_or_else(|| ToolError::ExecutionFailed(format!("未找到城市：{city}")))?;
        debug!(city = %place.name, lat = place.latitude, lon = place.longitude, "City geocoded");
        let current = self.current(&place).await?;

        let condition = current.weather_code.map(describe_code).unwrap_or("未知");
        let message = match current.temperature_2m {
            Some(t) => format!("{} 当前 {condition}，{t}°C", place.name),
            None => format!("{} 当前 {condition}", place.name),
        };
        Ok(ToolOutput::new(
            message,
            json!({
                "city": place.name,
                "country": place.country,
                "temperature": current.temperature_2m,
                "apparent_temperature": current.apparent_temperature,
                "wind_speed": current.wind_speed_10m,
                "weather_code": current.weather_code,
                "condition": condition,
            }),
        ))
    }
}

impl Tool for WeatherTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("get_weather", "Current weather for a city.").param(ParamSpec::optional(
            "city",
            ParamType::String,
            "City name; the configured home city when omitted",
        ))
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::test_support::{args, context};

    fn tool_for(server: &MockServer) -> WeatherTool {
        WeatherTool::new(
            format!("{}/v1/search", server.uri()),
            format!("{}/v1/forecast", server.uri()),
            "Singapore",
        )
    }

    #[tokio::test]
    async fn returns_current_conditions_for_city() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/search"))
            .and(query_param("name", "上海"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"name": "上海", "country": "中国", "latitude": 31.2, "longitude": 121.5}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "current": {
                    "temperature_2m": 22.5,
                    "apparent_temperature": 23.0,
                    "weather_code": 61,
                    "wind_speed_10m": 8.4
                }
            })))
            .mount(&server)
            .await;

        let out = tool_for(&server)
            .execute(args(json!({"city": "上海"})), context("s1"))
            .await
            .expect("weather");
        assert_eq!(out.payload["city"], "上海");
        assert_eq!(out.payload["temperature"], 22.5);
        assert_eq!(out.payload["condition"], "雨");
        assert!(out.message.contains("22.5"));
    }

    #[tokio::test]
    async fn uses_default_city_when_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/search"))
            .and(query_param("name", "Singapore"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
            .expect(1)
            .mount(&server)
            .await;

        let err = tool_for(&server)
            .execute(Map::new(), context("s1"))
            .await
            .expect_err("no such city");
        assert!(err.to_string().contains("Singapore"));
    }

    #[tokio::test]
    async fn upstream_error_is_a_tool_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/search"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = tool_for(&server)
            .execute(args(json!({"city": "Paris"})), context("s1"))
            .await
            .expect_err("503");
        assert!(matches!(err, ToolError::ExecutionFailed(_)));
    }

    #[test]
    fn weather_codes_map_to_conditions() {
        assert_eq!(describe_code(0), "晴");
        assert_eq!(describe_code(2), "多云");
        assert_eq!(describe_code(95), "雷暴");
        assert_eq!(describe_code(1000), "未知");
    }
}
