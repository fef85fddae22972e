use super::Metrics;
use dlpack::Device;
use std::{collections::BTreeSet, fmt, time::Duration};

/// 一个命名区间的测量结果。
#[derive(Clone, Debug)]
pub struct CallRecord {
    pub name: String,
    pub device: Device,
    pub duration: Duration,
    pub metrics: Metrics,
}

/// 一次性能分析的结果。
#[derive(Clone, Debug)]
pub struct Report {
    pub(super) devices: Vec<Device>,
    pub(super) calls: Vec<CallRecord>,
    pub(super) duration: Duration,
}

impl Report {
    #[inline]
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    #[inline]
    pub fn calls(&self) -> &[CallRecord] {
        &self.calls
    }

    /// 从全局开始到全局结束的时长。
    #[inline]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// 所有命名区间的时长之和。
    pub fn calls_duration(&self) -> Duration {
        self.calls.iter().map(|call| call.duration).sum()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let metrics = self
            .calls
            .iter()
            .flat_map(|call| call.metrics.keys())
            .collect::<BTreeSet<_>>();

        let mut header = vec![
            "Name".to_string(),
            "Device".to_string(),
            "Duration (us)".to_string(),
        ];
        header.extend(metrics.iter().map(|name| name.to_string()));

        let rows = self
            .calls
            .iter()
            .map(|call| {
                let mut row = vec![
                    call.name.clone(),
                    call.device.to_string(),
                    format!("{:.3}", call.duration.as_secs_f64() * 1e6),
                ];
                row.extend(metrics.iter().map(|name| {
                    call.metrics
                        .get(*name)
                        .map_or_else(|| "-".into(), ToString::to_string)
                }));
                row
            })
            .collect::<Vec<_>>();

        let widths = header
            .iter()
            .enumerate()
            .map(|(i, title)| {
                rows.iter()
                    .map(|row| row[i].len())
                    .chain([title.len()])
                    .max()
                    .unwrap_or(0)
            })
            .collect::<Vec<_>>();

        let write_row = |f: &mut fmt::Formatter, row: &[String]| -> fmt::Result {
            for (i, (cell, width)) in row.iter().zip(&widths).enumerate() {
                if i == 0 {
                    write!(f, "{cell:<width$}")?
                } else {
                    write!(f, "  {cell:>width$}")?
                }
            }
            writeln!(f)
        };

        write_row(f, &header)?;
        for row in &rows {
            write_row(f, row)?
        }
        writeln!(f)?;
        writeln!(
            f,
            "Calls: {}, Total: {:.3} us, Wall: {:.3} us",
            self.calls.len(),
            self.calls_duration().as_secs_f64() * 1e6,
            self.duration.as_secs_f64() * 1e6,
        )
    }
}

#[test]
fn test_display() {
    use super::Metric;

    let mut metrics = Metrics::new();
    metrics.insert("cycles".into(), Metric::Count(1234));
    let report = Report {
        devices: vec![Device::cpu(0)],
        calls: vec![CallRecord {
            name: "matmul_add_dyn".into(),
            device: Device::cpu(0),
            duration: Duration::from_micros(10),
            metrics,
        }],
        duration: Duration::from_micros(25),
    };
    let text = report.to_string();
    let mut lines = text.lines();
    let header = lines.next().unwrap();
    assert!(header.starts_with("Name"));
    assert!(header.ends_with("cycles"));
    let row = lines.next().unwrap();
    assert!(row.starts_with("matmul_add_dyn"));
    assert!(row.contains("cpu:0"));
    assert!(row.contains("10.000"));
    assert!(row.ends_with("1234"));
    assert!(text.contains("Calls: 1, Total: 10.000 us, Wall: 25.000 us"));
}
