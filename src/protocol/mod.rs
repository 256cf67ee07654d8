//! JSON command protocol spoken with the calling server.
//!
//! A request names an action and its params; a response reports success,
//! action data, or a structured failure:
//!
//! ```json
//! {"action":"escalate","params":{"label":"Rollback plan","containerLabel":"Incidents","message":"...","timeoutMs":600000,"runId":"..."}}
//! {"success":false,"data":{"runId":"...","hint":"..."},"error":"...","failedStep":6,"errorReason":"conversation_not_found"}
//! ```
//!
//! # Module Structure
//!
//! - `types`: `Action`, `Params`, `Command`, `CommandResult`
//! - `io`: parsing with classified errors, one-shot reads, the JSONL reader and result writer

mod io;
mod types;

pub use io::*;
pub use types::*;
