use crate::pipeline::{Emission, StageContext, StageError, StageHandler};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

/// Emits a range of numbers, e.g. page numbers of a listing
///
/// `params.start` (default 1) to `params.stop` inclusive, stepping by
/// `params.step` (default 1, may be negative). Each number is emitted as
/// `{"number": n}` on `pass`, merged into the incoming payload.
pub struct SequenceHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Range {
    start: i64,
    stop: i64,
    step: i64,
}

fn int_param(params: &Map<String, Value>, name: &str) -> Result<Option<i64>, StageError> {
    match params.get(name) {
        None => Ok(None),
        Some(value) => value.as_i64().map(Some).ok_or_else(|| StageError::InvalidParam {
            name: name.to_string(),
            message: format!("expected an integer, got {}", value),
        }),
    }
}

fn range(params: &Map<String, Value>) -> Result<Range, StageError> {
    let start = int_param(params, "start")?.unwrap_or(1);
    let stop = int_param(params, "stop")?.ok_or_else(|| StageError::MissingParam("stop".to_string()))?;
    let step = int_param(params, "step")?.unwrap_or(1);

    if step == 0 {
        return Err(StageError::InvalidParam {
            name: "step".to_string(),
            message: "must not be zero".to_string(),
        });
    }

    Ok(Range { start, stop, step })
}

impl Range {
    fn numbers(self) -> impl Iterator<Item = i64> {
        let Range { start, stop, step } = self;
        std::iter::successors(Some(start), move |n| n.checked_add(step))
            .take_while(move |n| if step > 0 { *n <= stop } else { *n >= stop })
    }
}

#[async_trait]
impl StageHandler for SequenceHandler {
    async fn execute(&self, ctx: &mut StageContext) -> Result<Vec<Emission>, StageError> {
        let range = range(ctx.params())?;
        let base = super::extend_payload(ctx.payload());

        // One past the limit so the runner notices and reports the truncation
        Ok(range
            .numbers()
            .take(ctx.max_fanout().saturating_add(1))
            .map(|n| {
                let mut payload = base.clone();
                payload.insert("number".to_string(), json!(n));
                Emission::pass(Value::Object(payload))
            })
            .collect())
    }

    fn validate(&self, params: &Map<String, Value>) -> Result<(), StageError> {
        range(params).map(|_| ())
    }
}
