//! HTTP surface for the cookie scanning service.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Liveness + pool/trigger stats. |
//! | `POST`   | `/scans` | Create a scan, executed asynchronously. |
//! | `GET`    | `/scans` | Paginated listing with filters. |
//! | `GET`    | `/scans/{id}` | Full scan result. |
//! | `GET`    | `/scans/{id}/progress` | Latest progress snapshot. |
//! | `GET`    | `/scans/{id}/stream` | SSE progress stream (2 s cadence). |
//! | `DELETE` | `/scans/{id}` | Cancel a live scan / delete a finished one. |
//! | `POST`   | `/scans/batch` | Scan up to 10 domains under the concurrency gate. |
//! | `POST`   | `/schedules` | Create a schedule. |
//! | `GET`    | `/schedules` | List schedules. |
//! | `GET`    | `/schedules/{id}` | Fetch one schedule. |
//! | `PUT`    | `/schedules/{id}` | Partial update. |
//! | `DELETE` | `/schedules/{id}` | Delete. |
//! | `POST`   | `/schedules/sync` | Trigger an external-source sync now. |
//! | `GET`    | `/schedules/{id}/executions` | Job execution history. |
//! | `GET`    | `/executions/{id}` | One job execution. |

pub mod error;
pub mod handlers;
pub mod server;
pub mod state;

pub use error::{GatewayError, GatewayResult};
pub use server::build_router;
pub use state::AppState;
