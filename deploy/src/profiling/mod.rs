//! 命名区间的性能分析。

mod collector;
mod report;

#[cfg(unix)]
mod rusage;

pub use collector::{Metric, MetricCollector, Metrics};
pub use report::{CallRecord, Report};

#[cfg(unix)]
pub use rusage::RusageCollector;

use crate::{profiler_misuse, Error};
use dlpack::Device;
use log::{debug, info, warn};
use std::{mem::replace, time::Instant};

/// 分析器所处的阶段。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProfilerState {
    Idle,
    Started,
    CallOpen,
    Stopped,
}

enum State {
    Idle,
    Started(Instant),
    CallOpen(Instant, OpenCall),
    Stopped,
}

struct OpenCall {
    name: String,
    device: Device,
    start: Instant,
    active: Vec<usize>,
}

impl State {
    fn phase(&self) -> ProfilerState {
        match self {
            Self::Idle => ProfilerState::Idle,
            Self::Started(_) => ProfilerState::Started,
            Self::CallOpen(..) => ProfilerState::CallOpen,
            Self::Stopped => ProfilerState::Stopped,
        }
    }
}

/// 性能分析器。
///
/// 生命周期为 `Idle -> Started -> (CallOpen -> Started)* -> Stopped`，
/// 越过阶段的调用返回 [ProfilerMisuse](crate::ErrorKind::ProfilerMisuse) 且不改变状态。
/// 已停止的分析器不能重新启动。
pub struct Profiler {
    devices: Vec<Device>,
    collectors: Vec<Box<dyn MetricCollector>>,
    state: State,
    calls: Vec<CallRecord>,
}

impl Profiler {
    pub fn new(
        devices: impl IntoIterator<Item = Device>,
        mut collectors: Vec<Box<dyn MetricCollector>>,
    ) -> Result<Self, Error> {
        let devices = devices.into_iter().collect::<Vec<_>>();
        for collector in &mut collectors {
            collector.init(&devices)?;
            debug!("collector {} initialized", collector.name());
        }
        info!(
            "profiler created on {} device(s) with {} collector(s)",
            devices.len(),
            collectors.len(),
        );
        Ok(Self {
            devices,
            collectors,
            state: State::Idle,
            calls: Vec::new(),
        })
    }

    #[inline]
    pub fn state(&self) -> ProfilerState {
        self.state.phase()
    }

    #[inline]
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// 开始全局计时。
    pub fn start(&mut self) -> Result<(), Error> {
        match self.state {
            State::Idle => {
                self.state = State::Started(Instant::now());
                Ok(())
            }
            ref state => Err(profiler_misuse(format!("start in {:?}", state.phase()))),
        }
    }

    /// 打开一个命名区间。
    pub fn start_call(&mut self, name: impl Into<String>, device: Device) -> Result<(), Error> {
        let State::Started(global) = self.state else {
            return Err(profiler_misuse(format!(
                "start_call in {:?}",
                self.state()
            )));
        };
        if !self.devices.contains(&device) {
            return Err(profiler_misuse(format!("{device} is not profiled")));
        }

        let mut active = Vec::with_capacity(self.collectors.len());
        for (i, collector) in self.collectors.iter_mut().enumerate() {
            if collector.start(device)? {
                active.push(i)
            }
        }
        let call = OpenCall {
            name: name.into(),
            device,
            start: Instant::now(),
            active,
        };
        self.state = State::CallOpen(global, call);
        Ok(())
    }

    /// 关闭当前区间，记录耗时和各收集器的指标。
    pub fn stop_call(&mut self) -> Result<(), Error> {
        let (global, call) = match replace(&mut self.state, State::Idle) {
            State::CallOpen(global, call) => (global, call),
            state => {
                let phase = state.phase();
                self.state = state;
                return Err(profiler_misuse(format!("stop_call in {phase:?}")));
            }
        };
        let duration = call.start.elapsed();
        self.state = State::Started(global);

        // 每个已启动的收集器都要停止，之后再报告第一个错误
        let mut metrics = Metrics::new();
        let mut first_err = None;
        for i in call.active {
            match self.collectors[i].stop() {
                Ok(m) => metrics.extend(m),
                Err(e) => {
                    warn!("collector {} failed to stop: {e}", self.collectors[i].name());
                    first_err.get_or_insert(e);
                }
            }
        }
        debug!("{} on {} took {duration:?}", call.name, call.device);
        self.calls.push(CallRecord {
            name: call.name,
            device: call.device,
            duration,
            metrics,
        });
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 在命名区间内执行 `f`，无论 `f` 是否成功都会关闭区间。
    pub fn measure<T>(
        &mut self,
        name: impl Into<String>,
        device: Device,
        f: impl FnOnce() -> Result<T, Error>,
    ) -> Result<T, Error> {
        self.start_call(name, device)?;
        let ans = f();
        self.stop_call()?;
        ans
    }

    /// 结束分析并生成报告。
    pub fn stop(&mut self) -> Result<Report, Error> {
        let State::Started(global) = self.state else {
            return Err(profiler_misuse(format!("stop in {:?}", self.state())));
        };
        self.state = State::Stopped;
        Ok(Report {
            devices: self.devices.clone(),
            calls: std::mem::take(&mut self.calls),
            duration: global.elapsed(),
        })
    }
}
