//! Bounded staging buffer for values crossing a suspension boundary.
//!
//! Every transfer into a task (start arguments, inbox deliveries, staged
//! results) goes through a `TransferStack` so that a runaway producer fails
//! with `StackOverflow` instead of growing without bound.

use crate::SchedError;
use fibra_sdk::Value;

/// Bounded FIFO buffer of staged values.
pub(crate) struct TransferStack {
    values: Vec<Value>,
    limit: usize,
}

impl TransferStack {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            values: Vec::new(),
            limit,
        }
    }

    /// Append `values`, failing if the buffer would exceed its limit.
    pub(crate) fn push_all(&mut self, values: Vec<Value>) -> Result<(), SchedError> {
        let count = self.values.len() + values.len();
        if count > self.limit {
            return Err(SchedError::StackOverflow {
                count,
                limit: self.limit,
            });
        }
        self.values.extend(values);
        Ok(())
    }

    /// Drain all staged values, leaving the buffer empty.
    pub(crate) fn take(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.values)
    }

    /// Copy of the staged values without draining them.
    pub(crate) fn snapshot(&self) -> Vec<Value> {
        self.values.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_take() {
        let mut stack = TransferStack::new(4);
        stack
            .push_all(vec![Value::Int(1), Value::Int(2)])
            .unwrap();

        let taken = stack.take();
        assert_eq!(taken, vec![Value::Int(1), Value::Int(2)]);
        assert!(stack.take().is_empty());
    }

    #[test]
    fn test_overflow() {
        let mut stack = TransferStack::new(2);
        stack.push_all(vec![Value::Int(1)]).unwrap();

        let err = stack
            .push_all(vec![Value::Int(2), Value::Int(3)])
            .unwrap_err();
        assert_eq!(err, SchedError::StackOverflow { count: 3, limit: 2 });

        // Failed transfer leaves the buffer untouched
        assert_eq!(stack.snapshot(), vec![Value::Int(1)]);
    }

    #[test]
    fn test_snapshot_keeps_values() {
        let mut stack = TransferStack::new(4);
        stack.push_all(vec![Value::Int(7)]).unwrap();
        assert_eq!(stack.snapshot(), vec![Value::Int(7)]);
        assert_eq!(stack.take(), vec![Value::Int(7)]);
    }
}
