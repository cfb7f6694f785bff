use crate::error::Result;
use crate::tools::{Tool, ToolParameters, ToolResult};
use serde_json::{Value, json};

/// 航班查询工具：按 (出发城市, 目的城市) 查固定航班表
pub struct FlightInfoTool;

struct FlightRecord {
    origin: &'static str,
    destination: &'static str,
    airline: &'static str,
    flight_number: &'static str,
    flight_date: &'static str,
    flight_time: &'static str,
}

const FLIGHTS: &[FlightRecord] = &[FlightRecord {
    origin: "Seattle",
    destination: "Miami",
    airline: "Delta",
    flight_number: "DL123",
    flight_date: "May 7th, 2024",
    flight_time: "10:00AM",
}];

/// 纯查表；未命中时返回显式的 not-found 对象
pub fn lookup_flight(origin: &str, destination: &str) -> Value {
    FLIGHTS
        .iter()
        .find(|f| f.origin == origin && f.destination == destination)
        .map(|f| {
            json!({
                "airline": f.airline,
                "flight_number": f.flight_number,
                "flight_date": f.flight_date,
                "flight_time": f.flight_time,
            })
        })
        .unwrap_or_else(|| json!({ "error": "No flights found between the cities" }))
}

#[async_trait::async_trait]
impl Tool for FlightInfoTool {
    fn name(&self) -> &str {
        "getFlightInfo"
    }

    fn description(&self) -> &str {
        "Returns information about the next flight between two cities. This includes the name of the airline, flight number and the date and time of the next flight"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "originCity": {
                    "type": "string",
                    "description": "The name of the city where the flight originates"
                },
                "destinationCity": {
                    "type": "string",
                    "description": "The flight destination city"
                }
            },
            "required": ["originCity", "destinationCity"]
        })
    }

    async fn execute(&self, parameters: ToolParameters) -> Result<ToolResult> {
        let origin = parameters
            .get("originCity")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let destination = parameters
            .get("destinationCity")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        Ok(ToolResult::success(
            lookup_flight(origin, destination).to_string(),
        ))
    }
}
