use metricsd_common::Metric;
use sysinfo::System;

pub struct CpuCollector {
    system: System,
}

impl CpuCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        Self { system }
    }

    pub fn collect(&mut self, out: &mut Vec<Metric>) {
        self.system.refresh_cpu_all();

        out.push(Metric::gauge(
            "system_cpu_usage_percent",
            f64::from(self.system.global_cpu_usage()),
        ));
        out.push(Metric::gauge(
            "system_cpu_count",
            self.system.cpus().len() as f64,
        ));

        for (i, cpu) in self.system.cpus().iter().enumerate() {
            out.push(
                Metric::gauge("system_cpu_core_usage_percent", f64::from(cpu.cpu_usage()))
                    .with_label("core", i.to_string()),
            );
        }
    }
}

impl Default for CpuCollector {
    fn default() -> Self {
        Self::new()
    }
}
