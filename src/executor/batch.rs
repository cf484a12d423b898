//! Serial batching of a play's hosts.

use serde_json::Value as JsonValue;

use super::{ExecutorError, ExecutorResult};

/// One entry of a play's `serial` list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SerialSize {
    /// A fixed number of hosts; zero or less means every remaining host
    Count(i64),
    /// A percentage of the play's total host count
    Percent(f64),
}

impl SerialSize {
    /// Batch size for a play targeting `total` hosts.
    ///
    /// Percentages round down but never below one host.
    pub fn to_count(self, total: usize) -> i64 {
        match self {
            SerialSize::Count(n) => n,
            SerialSize::Percent(pct) => {
                let n = ((pct / 100.0) * total as f64).floor() as i64;
                if n == 0 {
                    1
                } else {
                    n
                }
            }
        }
    }
}

impl TryFrom<&JsonValue> for SerialSize {
    type Error = ExecutorError;

    fn try_from(value: &JsonValue) -> ExecutorResult<Self> {
        match value {
            JsonValue::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(SerialSize::Count)
                .ok_or_else(|| ExecutorError::RuntimeError(format!("invalid serial value {}", n))),
            JsonValue::String(s) => {
                let s = s.trim();
                if let Some(pct) = s.strip_suffix('%') {
                    pct.trim()
                        .parse::<f64>()
                        .map(SerialSize::Percent)
                        .map_err(|_| ExecutorError::RuntimeError(format!("invalid serial percentage '{}'", s)))
                } else {
                    s.parse::<i64>()
                        .map(SerialSize::Count)
                        .map_err(|_| ExecutorError::RuntimeError(format!("invalid serial value '{}'", s)))
                }
            }
            other => Err(ExecutorError::RuntimeError(format!("invalid serial value {}", other))),
        }
    }
}

/// Parse a play's `serial` field.
pub fn parse_serial(values: &[JsonValue]) -> ExecutorResult<Vec<SerialSize>> {
    values.iter().map(SerialSize::try_from).collect()
}

/// Split hosts into consecutive batches.
///
/// The last size repeats once the list runs out. An empty list yields a
/// single batch of every host.
pub fn get_serialized_batches<T: Clone>(serial: &[SerialSize], hosts: &[T]) -> Vec<Vec<T>> {
    let total = hosts.len();
    let sizes: &[SerialSize] = if serial.is_empty() {
        &[SerialSize::Count(-1)]
    } else {
        serial
    };

    let mut batches = Vec::new();
    let mut remaining = hosts;
    let mut cur_item = 0;
    while !remaining.is_empty() {
        let size = sizes[cur_item].to_count(total);
        if size <= 0 {
            batches.push(remaining.to_vec());
            break;
        }
        let take = (size as usize).min(remaining.len());
        let (batch, rest) = remaining.split_at(take);
        batches.push(batch.to_vec());
        remaining = rest;
        cur_item = (cur_item + 1).min(sizes.len() - 1);
    }
    batches
}
