use std::fmt;

/// 实际值相对期望值的误差。
#[derive(Clone, Copy, Default, Debug)]
pub(crate) struct Diff {
    pub abs: f64,
    pub rel: f64,
}

impl Diff {
    pub fn new(expected: f64, actual: f64) -> Self {
        let abs = (expected - actual).abs();
        let scale = expected.abs() + actual.abs() + f64::EPSILON;
        Self {
            abs,
            rel: abs / scale,
        }
    }

    /// 绝对误差和相对误差同时超过容限。
    #[inline]
    fn exceeds(&self, tol: &Diff) -> bool {
        self.abs > tol.abs && self.rel > tol.rel
    }
}

/// 逐元素比对两组数值，记录最大误差和超差元素的序号。
#[derive(Clone, Debug)]
pub(crate) struct ErrorCollector {
    tol: Diff,
    worst: Diff,
    outliers: Vec<usize>,
    total: usize,
}

impl ErrorCollector {
    pub fn new(abs: f64, rel: f64) -> Self {
        Self {
            tol: Diff { abs, rel },
            worst: Diff::default(),
            outliers: Vec::new(),
            total: 0,
        }
    }

    pub fn push(&mut self, diff: Diff) {
        self.worst.abs = self.worst.abs.max(diff.abs);
        self.worst.rel = self.worst.rel.max(diff.rel);
        if diff.exceeds(&self.tol) {
            self.outliers.push(self.total)
        }
        self.total += 1;
    }

    /// `(超差数, 总数)`
    #[inline]
    pub fn summary(&self) -> (usize, usize) {
        (self.outliers.len(), self.total)
    }

    #[inline]
    pub fn outliers(&self) -> &[usize] {
        &self.outliers
    }
}

impl fmt::Display for ErrorCollector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (outliers, total) = self.summary();
        write!(
            f,
            "{outliers}/{total} outliers, max abs {:.3e}, max rel {:.3e}",
            self.worst.abs, self.worst.rel,
        )
    }
}

#[test]
fn test_collector() {
    let mut ec = ErrorCollector::new(1e-6, 1e-3);
    ec.push(Diff::new(1., 1.));
    ec.push(Diff::new(100., 100.01));
    ec.push(Diff::new(1., 2.));
    ec.push(Diff::new(1e-9, 2e-9));
    assert_eq!(ec.summary(), (1, 4));
    assert_eq!(ec.outliers(), &[2]);
    assert_eq!(
        ec.to_string(),
        "1/4 outliers, max abs 1.000e0, max rel 3.333e-1"
    );
}
