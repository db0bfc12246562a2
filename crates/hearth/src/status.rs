//! JSON status endpoints served on plain HTTP requests.

use std::sync::Arc;

use hearth_protocol::RoomId;
use hearth_room::RoomRegistry;
use hearth_transport::{HttpRequest, HttpResponse, HttpRouter};

/// Reports live rooms.
///
/// - `GET /rooms`: every room as a JSON array of [`RoomInfo`](hearth_room::RoomInfo)
/// - `GET /rooms/{id}`: one room, 404 if it is gone
/// - `GET /health`: `{"status":"ok","rooms":n}`
pub struct StatusRouter {
    registry: Arc<RoomRegistry>,
}

impl StatusRouter {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry }
    }

    fn json(value: &impl serde::Serialize) -> HttpResponse {
        match serde_json::to_vec(value) {
            Ok(body) => HttpResponse::ok_json(body),
            Err(e) => {
                tracing::warn!(error = %e, "status serialization failed");
                HttpResponse::new(500, "Internal Server Error")
            }
        }
    }
}

impl HttpRouter for StatusRouter {
    fn route(&self, request: &HttpRequest) -> HttpResponse {
        if request.method != "GET" {
            return HttpResponse::new(405, "Method Not Allowed").with_header("Allow", "GET");
        }
        let path = request.path.split('?').next().unwrap_or_default();
        match path.trim_end_matches('/') {
            "/rooms" => Self::json(&self.registry.infos()),
            "/health" => Self::json(&serde_json::json!({
                "status": "ok",
                "rooms": self.registry.room_count(),
            })),
            other => {
                let room = other
                    .strip_prefix("/rooms/")
                    .and_then(|id| id.parse::<u64>().ok())
                    .and_then(|id| self.registry.get(RoomId(id)));
                match room {
                    Some(room) => Self::json(&room.info()),
                    None => HttpResponse::not_found(),
                }
            }
        }
    }
}
