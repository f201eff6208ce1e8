use metricsd_common::Metric;
use sysinfo::System;

#[derive(Default)]
pub struct LoadCollector;

impl LoadCollector {
    pub fn new() -> Self {
        Self
    }

    pub fn collect(&mut self, out: &mut Vec<Metric>) {
        let load_avg = System::load_average();
        out.push(Metric::gauge("system_load1", load_avg.one));
        out.push(Metric::gauge("system_load5", load_avg.five));
        out.push(Metric::gauge("system_load15", load_avg.fifteen));
        out.push(Metric::counter(
            "system_uptime_seconds",
            System::uptime() as f64,
        ));
    }
}
