//! Reduction functions applied to a window's buffered samples

use std::fmt;
use std::sync::Arc;

/// Signature of a user-supplied reducer.
///
/// Receives a non-empty slice of equal-arity tuples and must return one tuple
/// of the same arity.
pub type ReduceFn = Arc<dyn Fn(&[Vec<f64>]) -> Vec<f64> + Send + Sync>;

#[derive(Clone)]
pub enum Reducer {
    Average,
    Min,
    Max,
    Count,
    Custom { name: String, func: ReduceFn },
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnknownReducer(pub String);

impl fmt::Display for UnknownReducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown reducer '{}' (expected avg, min, max or count)", self.0)
    }
}

impl std::error::Error for UnknownReducer {}

/// A reducer returned a tuple whose arity differs from its input.
#[derive(Debug, Clone, PartialEq)]
pub struct ReducerArityMismatch {
    pub reducer: String,
    pub expected: usize,
    pub got: usize,
}

impl fmt::Display for ReducerArityMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Reducer '{}' returned {} field(s) for {}-field samples",
            self.reducer, self.got, self.expected
        )
    }
}

impl std::error::Error for ReducerArityMismatch {}

impl Reducer {
    pub fn custom<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[Vec<f64>]) -> Vec<f64> + Send + Sync + 'static,
    {
        Reducer::Custom {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn from_name(name: &str) -> Result<Self, UnknownReducer> {
        match name.trim().to_lowercase().as_str() {
            "avg" | "average" => Ok(Reducer::Average),
            "min" => Ok(Reducer::Min),
            "max" => Ok(Reducer::Max),
            "count" => Ok(Reducer::Count),
            _ => Err(UnknownReducer(name.to_string())),
        }
    }

    /// Identifier used in the published path descriptor
    pub fn name(&self) -> &str {
        match self {
            Reducer::Average => "avg",
            Reducer::Min => "min",
            Reducer::Max => "max",
            Reducer::Count => "count",
            Reducer::Custom { name, .. } => name,
        }
    }

    /// Reduce equal-arity tuples into one tuple.
    ///
    /// An empty input yields `Ok(None)`, the empty marker stored in history.
    pub fn reduce(&self, tuples: &[Vec<f64>]) -> Result<Option<Vec<f64>>, ReducerArityMismatch> {
        let Some(first) = tuples.first() else {
            return Ok(None);
        };
        let arity = first.len();

        let reduced = match self {
            Reducer::Average => {
                let n = tuples.len() as f64;
                column_fold(tuples, arity, 0.0, |acc, v| acc + v)
                    .into_iter()
                    .map(|sum| sum / n)
                    .collect()
            }
            Reducer::Min => column_fold(tuples, arity, f64::INFINITY, f64::min),
            Reducer::Max => column_fold(tuples, arity, f64::NEG_INFINITY, f64::max),
            Reducer::Count => vec![tuples.len() as f64; arity],
            Reducer::Custom { func, .. } => func(tuples),
        };

        if reduced.len() != arity {
            return Err(ReducerArityMismatch {
                reducer: self.name().to_string(),
                expected: arity,
                got: reduced.len(),
            });
        }

        Ok(Some(reduced))
    }
}

fn column_fold<F>(tuples: &[Vec<f64>], arity: usize, init: f64, f: F) -> Vec<f64>
where
    F: Fn(f64, f64) -> f64,
{
    let mut acc = vec![init; arity];
    for tuple in tuples {
        for (slot, value) in acc.iter_mut().zip(tuple) {
            *slot = f(*slot, *value);
        }
    }
    acc
}

impl fmt::Debug for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reducer::Custom { name, .. } => write!(f, "Custom({})", name),
            other => f.write_str(other.name()),
        }
    }
}

impl Default for Reducer {
    fn default() -> Self {
        Reducer::Average
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuples(rows: &[&[f64]]) -> Vec<Vec<f64>> {
        rows.iter().map(|r| r.to_vec()).collect()
    }

    #[test]
    fn test_average() {
        let out = Reducer::Average.reduce(&tuples(&[&[1.0, 2.0], &[3.0, 4.0]])).unwrap();
        assert_eq!(out, Some(vec![2.0, 3.0]));
    }

    #[test]
    fn test_min_max() {
        let input = tuples(&[&[1.0, 5.0], &[3.0, 2.0]]);
        assert_eq!(Reducer::Min.reduce(&input).unwrap(), Some(vec![1.0, 2.0]));
        assert_eq!(Reducer::Max.reduce(&input).unwrap(), Some(vec![3.0, 5.0]));
    }

    #[test]
    fn test_count() {
        let input = tuples(&[&[1.0, 1.0], &[1.0, 1.0], &[1.0, 1.0]]);
        assert_eq!(Reducer::Count.reduce(&input).unwrap(), Some(vec![3.0, 3.0]));
    }

    #[test]
    fn test_empty_input_yields_marker() {
        assert_eq!(Reducer::Average.reduce(&[]), Ok(None));
        assert_eq!(Reducer::Count.reduce(&[]), Ok(None));
    }

    #[test]
    fn test_custom_reducer() {
        let last = Reducer::custom("last", |rows| rows[rows.len() - 1].clone());
        assert_eq!(last.name(), "last");
        let out = last.reduce(&tuples(&[&[1.0, 2.0], &[7.0, 8.0]]));
        assert_eq!(out, Ok(Some(vec![7.0, 8.0])));
    }

    #[test]
    fn test_custom_reducer_arity_checked() {
        let first_only = Reducer::custom("first", |rows| vec![rows[0][0]]);
        let err = first_only
            .reduce(&tuples(&[&[1.0, 2.0], &[3.0, 4.0]]))
            .unwrap_err();
        assert_eq!(
            err,
            ReducerArityMismatch {
                reducer: "first".to_string(),
                expected: 2,
                got: 1,
            }
        );
    }

    #[test]
    fn test_from_name() {
        assert_eq!(Reducer::from_name("AVG").unwrap().name(), "avg");
        assert_eq!(Reducer::from_name("average").unwrap().name(), "avg");
        assert_eq!(Reducer::from_name("count").unwrap().name(), "count");
        assert!(Reducer::from_name("median").is_err());
    }
}
