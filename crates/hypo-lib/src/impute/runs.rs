/// Maximal stretch of consecutive missing values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub start: usize,
    pub len: usize,
}

impl Run {
    /// One past the last missing index.
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    /// Index of the known value bounding the run on the left.
    pub fn left(&self) -> Option<usize> {
        self.start.checked_sub(1)
    }

    /// Index of the known value bounding the run on the right.
    pub fn right(&self, total: usize) -> Option<usize> {
        (self.end() < total).then(|| self.end())
    }
}

/// Run-length encode the missing mask of `values`.
pub fn missing_runs(values: &[Option<f64>]) -> Vec<Run> {
    let mut runs = Vec::new();
    let mut current: Option<Run> = None;
    for (idx, value) in values.iter().enumerate() {
        if value.is_some() {
            if let Some(run) = current.take() {
                runs.push(run);
            }
        } else if let Some(run) = current.as_mut() {
            run.len += 1;
        } else {
            current = Some(Run { start: idx, len: 1 });
        }
    }
    runs.extend(current);
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_maximal_runs() {
        let v = [None, Some(1.0), None, None, Some(2.0), None];
        assert_eq!(
            missing_runs(&v),
            vec![
                Run { start: 0, len: 1 },
                Run { start: 2, len: 2 },
                Run { start: 5, len: 1 },
            ]
        );
        assert!(missing_runs(&[Some(1.0), Some(2.0)]).is_empty());
        assert!(missing_runs(&[]).is_empty());
    }

    #[test]
    fn bounds_reflect_series_edges() {
        let leading = Run { start: 0, len: 2 };
        assert_eq!(leading.left(), None);
        assert_eq!(leading.right(5), Some(2));
        let trailing = Run { start: 3, len: 2 };
        assert_eq!(trailing.left(), Some(2));
        assert_eq!(trailing.right(5), None);
    }
}
