use crate::aggregation::operators::add_numbers;
use crate::aggregation::{OperatorImpl, OperatorRegistry};
use crate::common::Value;
use crate::errors::QuarryResult;

/// Running state of one accumulator for one group.
///
/// `$group` creates a fresh accumulator per group key, feeds it the
/// evaluated operand for every document in the group, then reads the result.
pub trait Accumulator: Send {
    /// Folds the next value in. `None` means the operand was absent.
    fn accumulate(&mut self, value: Option<Value>) -> QuarryResult<()>;

    /// Returns the accumulated value.
    fn result(&self) -> Value;
}

#[derive(Default)]
struct SumAccumulator {
    total: Option<Value>,
}

impl Accumulator for SumAccumulator {
    fn accumulate(&mut self, value: Option<Value>) -> QuarryResult<()> {
        let values = match value {
            Some(Value::Array(items)) => items,
            Some(v) => vec![v],
            None => vec![],
        };
        for value in values.into_iter().filter(|v| v.is_number()) {
            self.total = Some(match self.total.take() {
                Some(total) => add_numbers(&total, &value),
                None => value,
            });
        }
        Ok(())
    }

    fn result(&self) -> Value {
        self.total.clone().unwrap_or(Value::Int(0))
    }
}

#[derive(Default)]
struct AvgAccumulator {
    sum: f64,
    count: usize,
}

impl Accumulator for AvgAccumulator {
    fn accumulate(&mut self, value: Option<Value>) -> QuarryResult<()> {
        if let Some(number) = value.as_ref().and_then(|v| v.as_f64()) {
            self.sum += number;
            self.count += 1;
        }
        Ok(())
    }

    fn result(&self) -> Value {
        if self.count == 0 {
            Value::Null
        } else {
            Value::Float(self.sum / self.count as f64)
        }
    }
}

struct ExtremumAccumulator {
    current: Option<Value>,
    keep_max: bool,
}

impl Accumulator for ExtremumAccumulator {
    fn accumulate(&mut self, value: Option<Value>) -> QuarryResult<()> {
        let value = match value {
            Some(v) if !v.is_null() => v,
            _ => return Ok(()),
        };
        let replace = match &self.current {
            None => true,
            Some(current) if self.keep_max => value > *current,
            Some(current) => value < *current,
        };
        if replace {
            self.current = Some(value);
        }
        Ok(())
    }

    fn result(&self) -> Value {
        self.current.clone().unwrap_or(Value::Null)
    }
}

#[derive(Default)]
struct FirstAccumulator {
    first: Option<Value>,
}

impl Accumulator for FirstAccumulator {
    fn accumulate(&mut self, value: Option<Value>) -> QuarryResult<()> {
        if self.first.is_none() {
            self.first = Some(value.unwrap_or(Value::Null));
        }
        Ok(())
    }

    fn result(&self) -> Value {
        self.first.clone().unwrap_or(Value::Null)
    }
}

#[derive(Default)]
struct LastAccumulator {
    last: Option<Value>,
}

impl Accumulator for LastAccumulator {
    fn accumulate(&mut self, value: Option<Value>) -> QuarryResult<()> {
        self.last = Some(value.unwrap_or(Value::Null));
        Ok(())
    }

    fn result(&self) -> Value {
        self.last.clone().unwrap_or(Value::Null)
    }
}

struct PushAccumulator {
    items: Vec<Value>,
    unique: bool,
}

impl Accumulator for PushAccumulator {
    fn accumulate(&mut self, value: Option<Value>) -> QuarryResult<()> {
        if let Some(value) = value {
            if !self.unique || !self.items.contains(&value) {
                self.items.push(value);
            }
        }
        Ok(())
    }

    fn result(&self) -> Value {
        Value::Array(self.items.clone())
    }
}

#[derive(Default)]
struct CountAccumulator {
    count: i64,
}

impl Accumulator for CountAccumulator {
    fn accumulate(&mut self, _value: Option<Value>) -> QuarryResult<()> {
        self.count += 1;
        Ok(())
    }

    fn result(&self) -> Value {
        Value::Int(self.count)
    }
}

/// Registers the built-in accumulators.
pub(crate) fn register_accumulators(registry: &OperatorRegistry) -> QuarryResult<()> {
    registry.register(
        "$sum",
        OperatorImpl::accumulator(|| Box::<SumAccumulator>::default()),
    )?;
    registry.register(
        "$avg",
        OperatorImpl::accumulator(|| Box::<AvgAccumulator>::default()),
    )?;
    registry.register(
        "$min",
        OperatorImpl::accumulator(|| {
            Box::new(ExtremumAccumulator {
                current: None,
                keep_max: false,
            })
        }),
    )?;
    registry.register(
        "$max",
        OperatorImpl::accumulator(|| {
            Box::new(ExtremumAccumulator {
                current: None,
                keep_max: true,
            })
        }),
    )?;
    registry.register(
        "$first",
        OperatorImpl::accumulator(|| Box::<FirstAccumulator>::default()),
    )?;
    registry.register(
        "$last",
        OperatorImpl::accumulator(|| Box::<LastAccumulator>::default()),
    )?;
    registry.register(
        "$push",
        OperatorImpl::accumulator(|| {
            Box::new(PushAccumulator {
                items: Vec::new(),
                unique: false,
            })
        }),
    )?;
    registry.register(
        "$addToSet",
        OperatorImpl::accumulator(|| {
            Box::new(PushAccumulator {
                items: Vec::new(),
                unique: true,
            })
        }),
    )?;
    registry.register(
        "$count",
        OperatorImpl::accumulator(|| Box::<CountAccumulator>::default()),
    )?;
    Ok(())
}
