//! Job payload and result encoding.
//!
//! Everything stored in the opaque `payload` and `result` columns goes
//! through [`encode`] and [`decode`]. The payload shape is deliberately
//! narrow (a name, a sequence and a string-keyed mapping) so any format with
//! scalar, sequence and mapping support would do; JSON is what we use.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Dynamically typed argument or return value.
pub type Value = serde_json::Value;

/// Keyword arguments, keyed by parameter name.
pub type Kwargs = serde_json::Map<String, Value>;

/// Encode any serializable value into payload bytes.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode payload bytes produced by [`encode`].
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| Error::Deserialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// The deferred call stored with a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Registered function name. Resolved only at execution time.
    #[serde(rename = "f")]
    pub function: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Kwargs,
}

impl Payload {
    pub fn new(function: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            function: function.into(),
            args: arguments.args,
            kwargs: arguments.kwargs,
        }
    }

    /// Split into the function name and the arguments handed to it.
    pub fn into_call(self) -> (String, Arguments) {
        (
            self.function,
            Arguments {
                args: self.args,
                kwargs: self.kwargs,
            },
        )
    }
}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// Positional and keyword arguments for a job function.
///
/// ```
/// use litejob::codec::Arguments;
///
/// let args = Arguments::new()
///     .arg(vec![1, 2, 3, 4])
///     .kwarg("multiplier", 3);
/// assert_eq!(args.get::<Vec<i64>>(0).unwrap(), vec![1, 2, 3, 4]);
/// assert_eq!(args.kwarg_or("multiplier", 1).unwrap(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    pub args: Vec<Value>,
    pub kwargs: Kwargs,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Build from a JSON array of positional arguments and a JSON object of
    /// keyword arguments.
    pub fn from_json(args: Value, kwargs: Value) -> Result<Self> {
        let args = match args {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => {
                return Err(Error::InvalidArgument(format!(
                    "positional arguments must be a JSON array, got {other}"
                )));
            }
        };
        let kwargs = match kwargs {
            Value::Object(map) => map,
            Value::Null => Kwargs::new(),
            other => {
                return Err(Error::InvalidArgument(format!(
                    "keyword arguments must be a JSON object, got {other}"
                )));
            }
        };
        Ok(Self { args, kwargs })
    }

    /// Number of arguments, positional and keyword.
    pub fn len(&self) -> usize {
        self.args.len() + self.kwargs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }

    /// Positional argument `index`, converted to `T`.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        let value = self.args.get(index).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "missing positional argument {index} (got {})",
                self.args.len()
            ))
        })?;
        T::deserialize(value)
            .map_err(|e| Error::InvalidArgument(format!("positional argument {index}: {e}")))
    }

    /// Keyword argument `name`, converted to `T`, or `None` if absent.
    pub fn kwarg_opt<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        self.kwargs
            .get(name)
            .map(|value| {
                T::deserialize(value)
                    .map_err(|e| Error::InvalidArgument(format!("keyword argument {name}: {e}")))
            })
            .transpose()
    }

    /// Keyword argument `name`, or `default` if absent.
    pub fn kwarg_or<T: DeserializeOwned>(&self, name: &str, default: T) -> Result<T> {
        Ok(self.kwarg_opt(name)?.unwrap_or(default))
    }
}

// ---------------------------------------------------------------------------
// Failure
// ---------------------------------------------------------------------------

/// Why a job ended up failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The worker's registry has no function under the job's name.
    FunctionNotRegistered,
    /// The stored payload could not be decoded.
    Deserialization,
    /// The function returned an error.
    Execution,
    /// The function panicked.
    Panic,
    /// The function's return value could not be encoded.
    Serialization,
    /// The function returned, but its result could not be written to the store.
    Store,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::FunctionNotRegistered => "function_not_registered",
            FailureKind::Deserialization => "deserialization",
            FailureKind::Execution => "execution",
            FailureKind::Panic => "panic",
            FailureKind::Serialization => "serialization",
            FailureKind::Store => "store",
        };
        f.write_str(s)
    }
}

/// Structured failure detail stored as a failed job's result.
///
/// Plain data rather than a live error: the failure happened in another
/// process and is reported, not re-raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    /// Failure from an error returned by a job function. The full cause
    /// chain goes into `trace`.
    pub fn execution(err: &anyhow::Error) -> Self {
        let failure = Self::new(FailureKind::Execution, err.to_string());
        if err.chain().count() > 1 {
            failure.with_trace(format!("{err:?}"))
        } else {
            failure
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<&Error> for Failure {
    fn from(err: &Error) -> Self {
        let kind = match err {
            Error::FunctionNotRegistered(_) => FailureKind::FunctionNotRegistered,
            Error::Deserialization(_) => FailureKind::Deserialization,
            Error::Serialization(_) => FailureKind::Serialization,
            _ => FailureKind::Execution,
        };
        Self::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_round_trips_mixed_argument_shapes() {
        let payload = Payload::new(
            "process_data",
            Arguments::new()
                .arg(vec![1, 2, 3, 4])
                .arg("label")
                .arg(2.5)
                .arg(json!({"nested": {"list": [true, null]}}))
                .kwarg("multiplier", 3)
                .kwarg("tags", json!(["a", "b"])),
        );

        let bytes = encode(&payload).unwrap();
        let decoded: Payload = decode(&bytes).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn payload_wire_shape_uses_short_function_key() {
        let payload = Payload::new("add", Arguments::new().arg(10).arg(20));
        let raw: Value = serde_json::from_slice(&encode(&payload).unwrap()).unwrap();
        assert_eq!(raw, json!({"f": "add", "args": [10, 20], "kwargs": {}}));
    }

    #[test]
    fn payload_without_arguments_decodes() {
        let payload: Payload = decode(br#"{"f": "noop"}"#).unwrap();
        assert_eq!(payload.function, "noop");
        assert!(payload.args.is_empty());
        assert!(payload.kwargs.is_empty());
    }

    #[test]
    fn garbage_bytes_are_a_deserialization_error() {
        let err = decode::<Payload>(b"\x80\x04not json").unwrap_err();
        assert!(matches!(err, Error::Deserialization(_)));
    }

    #[test]
    fn keyword_arguments_count_towards_len() {
        let args = Arguments::new().kwarg("x", 1);
        assert_eq!(args.len(), 1);
        assert!(!args.is_empty());

        let args = Arguments::new().arg(1).arg(2).kwarg("x", 3);
        assert_eq!(args.len(), 3);
        assert!(Arguments::new().is_empty());
    }

    #[test]
    fn store_failure_kind_displays_snake_case() {
        assert_eq!(FailureKind::Store.to_string(), "store");
        let raw = serde_json::to_value(FailureKind::Store).unwrap();
        assert_eq!(raw, json!("store"));
    }

    #[test]
    fn failure_round_trips() {
        let failure = Failure::new(FailureKind::Execution, "boom").with_trace("at line 1");
        let decoded: Failure = decode(&encode(&failure).unwrap()).unwrap();
        assert_eq!(decoded, failure);
    }

    #[test]
    fn typed_accessors_report_bad_arguments() {
        let args = Arguments::new().arg("ten").kwarg("delay", 2);

        assert!(matches!(args.get::<i64>(0), Err(Error::InvalidArgument(_))));
        assert!(matches!(args.get::<i64>(5), Err(Error::InvalidArgument(_))));
        assert_eq!(args.kwarg_opt::<u64>("delay").unwrap(), Some(2));
        assert_eq!(args.kwarg_opt::<u64>("missing").unwrap(), None);
        assert_eq!(args.kwarg_or("missing", 7u64).unwrap(), 7);
    }

    #[test]
    fn from_json_rejects_wrong_shapes() {
        assert!(Arguments::from_json(json!({"a": 1}), Value::Null).is_err());
        assert!(Arguments::from_json(Value::Null, json!([1])).is_err());

        let args = Arguments::from_json(json!([1, 2]), json!({"k": "v"})).unwrap();
        assert_eq!(args.len(), 2);
        assert_eq!(args.kwarg_opt::<String>("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn execution_failure_keeps_cause_chain() {
        let err = anyhow::anyhow!("disk full").context("writing report");
        let failure = Failure::execution(&err);
        assert_eq!(failure.kind, FailureKind::Execution);
        assert_eq!(failure.message, "writing report");
        assert!(failure.trace.unwrap().contains("disk full"));
    }
}
