//! Command-line arguments.
//!
//! ```text
//! medflow-client                         # listen for events
//! medflow-client submit <M1|MG|MM> <json> # submit an inference and wait
//! ```

use medflow_core::job::{JobKind, ModelType};
use medflow_realtime::api::JobRequest;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Listen,
    Submit(JobRequest),
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Unknown command '{0}'")]
    UnknownCommand(String),

    #[error("Usage: medflow-client submit <M1|MG|MM> <payload-json>")]
    Usage,

    #[error("Unknown model type '{0}', expected M1, MG or MM")]
    UnknownModel(String),

    #[error("Payload is not valid JSON: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

/// Parse arguments, excluding the program name.
pub fn parse<I>(args: I) -> Result<Command, CliError>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let Some(command) = args.next() else {
        return Ok(Command::Listen);
    };

    match command.as_str() {
        "listen" => Ok(Command::Listen),
        "submit" => {
            let (Some(model), Some(payload), None) = (args.next(), args.next(), args.next()) else {
                return Err(CliError::Usage);
            };
            let model = parse_model(&model)?;
            let payload: serde_json::Value = serde_json::from_str(&payload)?;
            Ok(Command::Submit(JobRequest::new(JobKind::Inference(model), payload)))
        }
        other => Err(CliError::UnknownCommand(other.to_string())),
    }
}

fn parse_model(raw: &str) -> Result<ModelType, CliError> {
    match raw.to_ascii_uppercase().as_str() {
        "M1" => Ok(ModelType::M1),
        "MG" => Ok(ModelType::Mg),
        "MM" => Ok(ModelType::Mm),
        _ => Err(CliError::UnknownModel(raw.to_string())),
    }
}
