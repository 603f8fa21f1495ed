//! Memo storage layouts.
//!
//! Rust counterparts of the three layouts the generator emits, usable to
//! drive a model natively and to check storage decisions:
//!
//! 1. **Scalar slot**: one value and one guard
//! 2. **Dense array**: flat row-major arrays indexed by integer arguments,
//!    bounds-checked on every access
//! 3. **Sparse map**: hash map keyed by the arguments
//!
//! Formulas are computed at most once per argument tuple. Each layout uses
//! interior mutability so a formula can recurse into the cell it fills.

use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::hash::Hash;
use std::io;
use std::panic;
use std::thread;
use thiserror::Error;

/// Stack size for formulas recursing deep into their own cell.
pub const DEEP_RECURSION_STACK: usize = 256 * 1024 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("{cell}: argument {param}={value} out of range 0..{bound}")]
    OutOfRange {
        cell: String,
        param: String,
        value: i64,
        bound: usize,
    },

    #[error("{cell}: takes {expected} arguments but {given} were given")]
    Arity {
        cell: String,
        expected: usize,
        given: usize,
    },
}

/// Storage of a cell without parameters.
#[derive(Debug, Default)]
pub struct ScalarSlot<T: Copy> {
    value: Cell<Option<T>>,
}

impl<T: Copy> ScalarSlot<T> {
    pub fn new() -> Self {
        ScalarSlot {
            value: Cell::new(None),
        }
    }

    #[inline]
    pub fn get(&self) -> Option<T> {
        self.value.get()
    }

    pub fn get_or_compute(&self, formula: impl FnOnce() -> T) -> T {
        if let Some(value) = self.value.get() {
            return value;
        }
        let value = formula();
        self.value.set(Some(value));
        value
    }

    pub fn clear(&self) {
        self.value.set(None);
    }
}

/// Storage of a cell over bounded non-negative integer arguments.
#[derive(Debug)]
pub struct DenseArray<T: Copy + Default> {
    name: String,
    params: Vec<String>,
    bounds: Vec<usize>,
    values: RefCell<Vec<T>>,
    has: RefCell<Vec<bool>>,
}

impl<T: Copy + Default> DenseArray<T> {
    pub fn new(name: impl Into<String>, params: &[&str], bounds: &[usize]) -> Self {
        let len = bounds.iter().product();
        DenseArray {
            name: name.into(),
            params: params.iter().map(|p| p.to_string()).collect(),
            bounds: bounds.to_vec(),
            values: RefCell::new(vec![T::default(); len]),
            has: RefCell::new(vec![false; len]),
        }
    }

    pub fn bounds(&self) -> &[usize] {
        &self.bounds
    }

    /// Row-major offset of an argument tuple.
    pub fn offset(&self, args: &[i64]) -> Result<usize, IndexError> {
        if args.len() != self.bounds.len() {
            return Err(IndexError::Arity {
                cell: self.name.clone(),
                expected: self.bounds.len(),
                given: args.len(),
            });
        }
        let mut offset = 0;
        for (idx, (&arg, &bound)) in args.iter().zip(&self.bounds).enumerate() {
            if arg < 0 || arg as usize >= bound {
                return Err(IndexError::OutOfRange {
                    cell: self.name.clone(),
                    param: self.params.get(idx).cloned().unwrap_or_default(),
                    value: arg,
                    bound,
                });
            }
            offset = offset * bound + arg as usize;
        }
        Ok(offset)
    }

    pub fn get(&self, args: &[i64]) -> Result<Option<T>, IndexError> {
        let offset = self.offset(args)?;
        let value = self.has.borrow()[offset].then(|| self.values.borrow()[offset]);
        Ok(value)
    }

    pub fn get_or_compute(
        &self,
        args: &[i64],
        formula: impl FnOnce() -> T,
    ) -> Result<T, IndexError> {
        let offset = self.offset(args)?;
        if self.has.borrow()[offset] {
            return Ok(self.values.borrow()[offset]);
        }
        // no borrow is held while the formula recurses
        let value = formula();
        self.values.borrow_mut()[offset] = value;
        self.has.borrow_mut()[offset] = true;
        Ok(value)
    }

    pub fn clear(&self) {
        self.has.borrow_mut().iter_mut().for_each(|h| *h = false);
    }
}

/// Storage of a cell over arbitrary hashable arguments.
#[derive(Debug)]
pub struct SparseMap<K: Eq + Hash, T: Clone> {
    values: RefCell<FxHashMap<K, T>>,
}

impl<K: Eq + Hash, T: Clone> Default for SparseMap<K, T> {
    fn default() -> Self {
        SparseMap {
            values: RefCell::new(FxHashMap::default()),
        }
    }
}

impl<K: Eq + Hash, T: Clone> SparseMap<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.borrow().is_empty()
    }

    pub fn get_or_compute(&self, key: K, formula: impl FnOnce() -> T) -> T {
        if let Some(value) = self.values.borrow().get(&key) {
            return value.clone();
        }
        let value = formula();
        self.values.borrow_mut().insert(key, value.clone());
        value
    }

    pub fn clear(&self) {
        self.values.borrow_mut().clear();
    }
}

/// Runs `f` on a scoped thread with a stack of `bytes`.
///
/// A panic in `f` is resumed on the calling thread.
pub fn with_stack<F, R>(bytes: usize, f: F) -> io::Result<R>
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    thread::scope(|scope| {
        let handle = thread::Builder::new()
            .name("cellspec-deep".into())
            .stack_size(bytes)
            .spawn_scoped(scope, f)?;
        match handle.join() {
            Ok(result) => Ok(result),
            Err(payload) => panic::resume_unwind(payload),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_computed_once() {
        let slot = ScalarSlot::new();
        let calls = Cell::new(0);
        for _ in 0..3 {
            let value = slot.get_or_compute(|| {
                calls.set(calls.get() + 1);
                1.5
            });
            assert_eq!(value, 1.5);
        }
        assert_eq!(calls.get(), 1);
        slot.clear();
        assert_eq!(slot.get(), None);
    }

    #[test]
    fn test_dense_offsets() {
        let grid: DenseArray<f64> = DenseArray::new("grid", &["i", "j"], &[3, 4]);
        assert_eq!(grid.offset(&[0, 0]), Ok(0));
        assert_eq!(grid.offset(&[1, 2]), Ok(6));
        assert_eq!(grid.offset(&[2, 3]), Ok(11));
        assert_eq!(
            grid.offset(&[1, 4]),
            Err(IndexError::OutOfRange {
                cell: "grid".into(),
                param: "j".into(),
                value: 4,
                bound: 4
            })
        );
        let err = grid.get_or_compute(&[-1, 0], || 0.0).unwrap_err();
        assert_eq!(err.to_string(), "grid: argument i=-1 out of range 0..3");
    }

    #[test]
    fn test_dense_rejects_wrong_arity() {
        let grid: DenseArray<f64> = DenseArray::new("grid", &["i", "j"], &[3, 4]);
        assert_eq!(
            grid.offset(&[1]),
            Err(IndexError::Arity {
                cell: "grid".into(),
                expected: 2,
                given: 1
            })
        );
        assert!(matches!(
            grid.offset(&[1, 2, 0]),
            Err(IndexError::Arity { given: 3, .. })
        ));
        let err = grid.get_or_compute(&[], || 1.0).unwrap_err();
        assert_eq!(err.to_string(), "grid: takes 2 arguments but 0 were given");
        assert_eq!(grid.get(&[1, 2]), Ok(None));
    }

    #[test]
    fn test_dense_computed_once() {
        let cell: DenseArray<i64> = DenseArray::new("foo", &["t"], &[5]);
        let calls = Cell::new(0);
        for _ in 0..2 {
            for t in 0..5 {
                let value = cell
                    .get_or_compute(&[t], || {
                        calls.set(calls.get() + 1);
                        t * 2
                    })
                    .unwrap();
                assert_eq!(value, t * 2);
            }
        }
        assert_eq!(calls.get(), 5);
        assert_eq!(cell.get(&[3]), Ok(Some(6)));
    }

    #[test]
    fn test_sparse() {
        let cell: SparseMap<String, String> = SparseMap::new();
        assert!(cell.is_empty());
        let a = cell.get_or_compute("a".into(), || "A".into());
        let again = cell.get_or_compute("a".into(), || unreachable!());
        assert_eq!(a, again);
        assert_eq!(cell.len(), 1);
    }

    fn count(cell: &DenseArray<i64>, n: i64) -> i64 {
        cell.get_or_compute(&[n], || if n == 0 { 0 } else { count(cell, n - 1) + 1 })
            .unwrap()
    }

    #[test]
    fn test_deep_recursion() {
        let n = 100_000;
        let result = with_stack(DEEP_RECURSION_STACK, || {
            let cell = DenseArray::new("count", &["n"], &[n as usize + 1]);
            count(&cell, n)
        })
        .unwrap();
        assert_eq!(result, n);
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn test_panic_resumed() {
        let _ = with_stack(1 << 20, || panic!("boom"));
    }
}
