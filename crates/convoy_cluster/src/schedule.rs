//! Ordered fan-out of a batch over a dispatcher's targets.
//!
//! The calling process takes part in the work: while items remain queued it
//! evaluates one itself between rounds of dispatching, so `k` targets give
//! `k + 1` concurrent evaluations.

use convoy_core::{EvaluationRequest, FunctionError, OptimError};
use tracing::debug;

use crate::dispatch::Dispatcher;

/// Evaluate `items` over `dispatcher`'s targets and the caller, returning
/// the results in input order.
///
/// Targets are filled in slot order and refilled as they free up. On the
/// first failure no further items are dispatched, the items already in
/// flight are drained, and the failure with the lowest index is returned.
/// A communication failure, or a target that is not ready, aborts
/// immediately.
pub fn fan_out<F>(
    dispatcher: &mut Dispatcher,
    items: &[Vec<f64>],
    mut local: F,
) -> Result<Vec<Vec<f64>>, OptimError>
where
    F: FnMut(&[f64]) -> Result<Vec<f64>, FunctionError>,
{
    dispatcher.ensure_ready()?;
    let n = items.len();
    let mut slots: Vec<Option<Vec<f64>>> = vec![None; n];
    let mut failure: Option<(usize, String)> = None;
    let mut next = 0;

    loop {
        while failure.is_none() && next < n {
            let Some(slot) = dispatcher.idle_target() else {
                break;
            };
            dispatcher.dispatch(
                slot,
                EvaluationRequest {
                    id: next,
                    x: items[next].clone(),
                },
            )?;
            next += 1;
        }

        if failure.is_none() && next < n {
            let id = next;
            next += 1;
            let outcome = local(&items[id]).map_err(|e| e.message().to_string());
            merge(&mut slots, &mut failure, id, outcome);
            while let Some((_, result)) = dispatcher.try_collect()? {
                let outcome = if result.success {
                    Ok(result.values)
                } else {
                    Err(result.message.unwrap_or_default())
                };
                merge(&mut slots, &mut failure, result.id, outcome);
            }
            continue;
        }

        if dispatcher.outstanding() == 0 {
            break;
        }
        let (_, result) = dispatcher.collect()?;
        let outcome = if result.success {
            Ok(result.values)
        } else {
            Err(result.message.unwrap_or_default())
        };
        merge(&mut slots, &mut failure, result.id, outcome);
    }

    if let Some((index, message)) = failure {
        return Err(OptimError::EvaluationFailed { index, message });
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(index, values)| {
            values.ok_or_else(|| OptimError::EvaluationFailed {
                index,
                message: "no result received".to_string(),
            })
        })
        .collect()
}

/// Store a successful result, or keep the failure with the lowest index.
fn merge(
    slots: &mut [Option<Vec<f64>>],
    failure: &mut Option<(usize, String)>,
    id: usize,
    outcome: Result<Vec<f64>, String>,
) {
    match outcome {
        Ok(values) if id < slots.len() => slots[id] = Some(values),
        Ok(_) => debug!(id, "Discarding result with unknown id"),
        Err(message) => {
            if failure.as_ref().map_or(true, |(index, _)| id < *index) {
                *failure = Some((id, message));
            }
        }
    }
}
