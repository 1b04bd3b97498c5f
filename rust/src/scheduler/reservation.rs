//! Bandwidth admission control.
//!
//! Ordinary ports reserve both columns at once. Ports that negotiate their
//! link record the negotiated speed as pre-reserved first and move it to
//! reserved once the link is confirmed.

use std::collections::BTreeMap;

use crate::error::{SchedResult, SchedulerError};
use crate::generation::classify::round_speed;
use crate::models::{
    is_multi_lane, qpc_of, slots_for_speed, FabricPos, Port, PortId, PortKind,
    QPC_MAX_BANDWIDTH_MBPS,
};

/// Reserved and pre-reserved bandwidth of one port.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Reservation {
    pub reserved_speed: u32,
    pub reserved_quad: bool,
    pub pre_reserved_speed: u32,
    pub pre_reserved_quad: bool,
}

/// Which columns a reservation writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReserveKind {
    Both,
    PreOnly,
    ReservedOnly,
}

impl ReserveKind {
    fn writes_reserved(self) -> bool {
        matches!(self, ReserveKind::Both | ReserveKind::ReservedOnly)
    }

    fn writes_pre_reserved(self) -> bool {
        matches!(self, ReserveKind::Both | ReserveKind::PreOnly)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PortPlace {
    fabric: FabricPos,
    kind: PortKind,
}

/// Per-port reservations plus the port layout needed to check them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReservationTable {
    entries: BTreeMap<PortId, Reservation>,
    places: BTreeMap<PortId, PortPlace>,
}

impl ReservationTable {
    /// Table where every port has reserved `speed_of(port)` in both columns.
    pub fn seeded(ports: &[Port], speed_of: impl Fn(&Port) -> u32) -> Self {
        let mut table = Self::default();
        for port in ports {
            let speed = speed_of(port);
            let quad = port.quad && speed > 0;
            table.places.insert(
                port.physical_id,
                PortPlace {
                    fabric: port.fabric_pos,
                    kind: port.kind,
                },
            );
            table.entries.insert(
                port.physical_id,
                Reservation {
                    reserved_speed: speed,
                    reserved_quad: quad,
                    pre_reserved_speed: speed,
                    pre_reserved_quad: quad,
                },
            );
        }
        table
    }

    pub fn get(&self, port: PortId) -> Option<Reservation> {
        self.entries.get(&port).copied()
    }

    /// Record `speed_mbps`/`quad` for `port` if the result stays admissible
    /// in a ring of `length` slots. On error the table is unchanged.
    pub fn reserve(
        &mut self,
        port: PortId,
        speed_mbps: u32,
        quad: bool,
        kind: ReserveKind,
        length: usize,
    ) -> SchedResult<()> {
        let place = self
            .places
            .get(&port)
            .copied()
            .ok_or_else(|| SchedulerError::InvalidArgument(format!("unknown port {}", port)))?;
        let speed = round_speed(speed_mbps, &place.kind)?;
        let quad = quad && speed > 0;

        let mut updated = self.entries.get(&port).copied().unwrap_or_default();
        if kind.writes_reserved() {
            updated.reserved_speed = speed;
            updated.reserved_quad = quad;
        }
        if kind.writes_pre_reserved() {
            updated.pre_reserved_speed = speed;
            updated.pre_reserved_quad = quad;
        }

        let column = |p: PortId, r: &Reservation, reserved: bool| -> (u32, bool) {
            let r = if p == port { &updated } else { r };
            if reserved {
                (r.reserved_speed, r.reserved_quad)
            } else {
                (r.pre_reserved_speed, r.pre_reserved_quad)
            }
        };

        // `true` checks the reserved column, `false` the pre-reserved one.
        let columns = [
            (true, kind.writes_reserved()),
            (false, kind.writes_pre_reserved()),
        ];
        for reserved in columns
            .into_iter()
            .filter_map(|(col, written)| written.then_some(col))
        {
            let qpc = qpc_of(place.fabric);
            let mates: Vec<(u32, bool)> = self
                .entries
                .iter()
                .filter(|(p, _)| self.places.get(*p).is_some_and(|m| qpc_of(m.fabric) == qpc))
                .map(|(&p, r)| column(p, r, reserved))
                .collect();

            let total: u32 = mates.iter().map(|&(s, _)| s).sum();
            if total > QPC_MAX_BANDWIDTH_MBPS {
                return Err(SchedulerError::Oversubscribed(format!(
                    "QPC {} would carry {} Mbps (max {})",
                    qpc, total, QPC_MAX_BANDWIDTH_MBPS
                )));
            }

            let multi = mates
                .iter()
                .filter(|&&(s, q)| s > 0 && is_multi_lane(s, q))
                .count();
            if multi > 1 {
                return Err(SchedulerError::PortInUse(format!(
                    "QPC {} already has a multi-lane port",
                    qpc
                )));
            }

            let units: usize = self
                .entries
                .iter()
                .map(|(&p, r)| slots_for_speed(column(p, r, reserved).0))
                .sum();
            if units + 1 > length {
                return Err(SchedulerError::Oversubscribed(format!(
                    "{} slots reserved plus one idle exceed the ring of {}",
                    units, length
                )));
            }
        }

        self.entries.insert(port, updated);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ReservationTable {
        let ports: Vec<Port> = (0..4).map(|i| Port::ethernet(10 + i, i as usize, 25_000)).collect();
        ReservationTable::seeded(&ports, |p| p.speed_mbps)
    }

    #[test]
    fn test_seeded_table_mirrors_ports() {
        let t = table();
        let r = t.get(12).unwrap();
        assert_eq!(r.reserved_speed, 25_000);
        assert_eq!(r.pre_reserved_speed, 25_000);
        assert!(!r.reserved_quad);
        assert!(t.get(99).is_none());
    }

    #[test]
    fn test_qpc_over_100g_is_rejected_unchanged() {
        let mut t = table();
        let before = t.clone();
        let err = t.reserve(11, 40_000, false, ReserveKind::Both, 400).unwrap_err();
        assert!(matches!(err, SchedulerError::Oversubscribed(_)));
        assert_eq!(t, before);
    }

    #[test]
    fn test_second_multi_lane_port_is_in_use() {
        let mut t = table();
        t.reserve(11, 0, false, ReserveKind::Both, 400).unwrap();
        t.reserve(12, 0, false, ReserveKind::Both, 400).unwrap();
        t.reserve(13, 0, false, ReserveKind::Both, 400).unwrap();
        t.reserve(10, 40_000, false, ReserveKind::Both, 400).unwrap();

        let before = t.clone();
        let err = t.reserve(11, 10_000, true, ReserveKind::Both, 400).unwrap_err();
        assert!(matches!(err, SchedulerError::PortInUse(_)));
        assert_eq!(t, before);
    }

    #[test]
    fn test_ring_budget_includes_one_idle_slot() {
        let mut t = table();
        // 4 x 10 slots reserved; a 41-slot ring has exactly one idle left.
        assert!(t.reserve(10, 25_000, false, ReserveKind::Both, 41).is_ok());
        let err = t.reserve(10, 25_000, false, ReserveKind::Both, 40).unwrap_err();
        assert!(matches!(err, SchedulerError::Oversubscribed(_)));
    }

    #[test]
    fn test_pre_reserve_then_confirm() {
        let mut t = table();
        t.reserve(10, 10_000, false, ReserveKind::PreOnly, 400).unwrap();
        let r = t.get(10).unwrap();
        assert_eq!(r.pre_reserved_speed, 10_000);
        assert_eq!(r.reserved_speed, 25_000);

        t.reserve(10, 10_000, false, ReserveKind::ReservedOnly, 400).unwrap();
        assert_eq!(t.get(10).unwrap().reserved_speed, 10_000);
    }

    #[test]
    fn test_speeds_are_rounded_by_port_kind() {
        let ports = vec![
            Port::ethernet(1, 0, 0),
            Port::new(2, 36, 0, false, PortKind::Pcie { pep: 0 }),
        ];
        let mut t = ReservationTable::seeded(&ports, |_| 0);
        t.reserve(1, 5_000, false, ReserveKind::Both, 400).unwrap();
        t.reserve(2, 50_000, false, ReserveKind::Both, 400).unwrap();
        assert_eq!(t.get(1).unwrap().reserved_speed, 10_000);
        assert_eq!(t.get(2).unwrap().reserved_speed, 40_000);

        assert!(matches!(
            t.reserve(7, 10_000, false, ReserveKind::Both, 400),
            Err(SchedulerError::InvalidArgument(_))
        ));
    }
}
