use metricsd_common::Metric;
use sysinfo::System;

pub struct MemoryCollector {
    system: System,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    pub fn collect(&mut self, out: &mut Vec<Metric>) {
        self.system.refresh_memory();

        let total = self.system.total_memory();
        let used = self.system.used_memory();
        let available = self.system.available_memory();

        out.push(Metric::gauge("system_memory_total_bytes", total as f64));
        out.push(Metric::gauge("system_memory_used_bytes", used as f64));
        out.push(Metric::gauge(
            "system_memory_available_bytes",
            available as f64,
        ));
        out.push(Metric::gauge(
            "system_memory_usage_percent",
            percent(used, total),
        ));

        let swap_total = self.system.total_swap();
        let swap_used = self.system.used_swap();
        out.push(Metric::gauge("system_swap_total_bytes", swap_total as f64));
        out.push(Metric::gauge("system_swap_used_bytes", swap_used as f64));
        out.push(Metric::gauge(
            "system_swap_usage_percent",
            percent(swap_used, swap_total),
        ));
    }
}

impl Default for MemoryCollector {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn percent(part: u64, total: u64) -> f64 {
    if total > 0 {
        (part as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::percent;

    #[test]
    fn percent_handles_zero_total() {
        assert_eq!(percent(5, 0), 0.0);
        assert_eq!(percent(25, 100), 25.0);
    }
}
