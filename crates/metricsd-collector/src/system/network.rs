use metricsd_common::Metric;
use sysinfo::Networks;

/// Per-interface traffic totals since boot, reported as counters so the sink
/// can derive rates.
pub struct NetworkCollector {
    networks: Networks,
}

impl NetworkCollector {
    pub fn new() -> Self {
        Self {
            networks: Networks::new_with_refreshed_list(),
        }
    }

    pub fn collect(&mut self, out: &mut Vec<Metric>) {
        self.networks.refresh();

        for (name, data) in self.networks.iter() {
            out.push(
                Metric::counter(
                    "system_network_receive_bytes_total",
                    data.total_received() as f64,
                )
                .with_label("interface", name),
            );
            out.push(
                Metric::counter(
                    "system_network_transmit_bytes_total",
                    data.total_transmitted() as f64,
                )
                .with_label("interface", name),
            );
            out.push(
                Metric::counter(
                    "system_network_receive_packets_total",
                    data.total_packets_received() as f64,
                )
                .with_label("interface", name),
            );
            out.push(
                Metric::counter(
                    "system_network_transmit_packets_total",
                    data.total_packets_transmitted() as f64,
                )
                .with_label("interface", name),
            );
        }
    }
}

impl Default for NetworkCollector {
    fn default() -> Self {
        Self::new()
    }
}
