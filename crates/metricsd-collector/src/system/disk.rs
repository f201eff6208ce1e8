use super::memory::percent;
use metricsd_common::Metric;
use sysinfo::Disks;

pub struct DiskCollector {
    disks: Disks,
}

impl DiskCollector {
    pub fn new() -> Self {
        Self {
            disks: Disks::new_with_refreshed_list(),
        }
    }

    pub fn collect(&mut self, out: &mut Vec<Metric>) {
        self.disks.refresh();

        for disk in self.disks.iter() {
            let mount = disk.mount_point().to_string_lossy().to_string();
            let total = disk.total_space();
            let available = disk.available_space();
            let used = total.saturating_sub(available);

            out.push(Metric::gauge("system_disk_total_bytes", total as f64).with_label("mount", &mount));
            out.push(Metric::gauge("system_disk_used_bytes", used as f64).with_label("mount", &mount));
            out.push(
                Metric::gauge("system_disk_available_bytes", available as f64)
                    .with_label("mount", &mount),
            );
            out.push(
                Metric::gauge("system_disk_usage_percent", percent(used, total))
                    .with_label("mount", mount),
            );
        }
    }
}

impl Default for DiskCollector {
    fn default() -> Self {
        Self::new()
    }
}
