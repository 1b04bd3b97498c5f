//! Python bindings over an in-memory register file.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::config::{SchedulerConfig, SchedulerMode};
use crate::error::SchedulerError;
use crate::hw::{FixedClock, SharedRegisters, SCHED_ACTIVE_PAGE};
use crate::models::{Port, PortKind, PortSpeedInfo};
use crate::scheduler::Scheduler;

fn to_py_err(e: SchedulerError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

/// A port handed to the scheduler.
#[pyclass(name = "Port")]
#[derive(Clone, Debug)]
pub struct PyPort {
    #[pyo3(get, set)]
    pub physical_id: u32,
    #[pyo3(get, set)]
    pub fabric_pos: usize,
    #[pyo3(get, set)]
    pub speed_mbps: u32,
    #[pyo3(get, set)]
    pub quad: bool,
    /// One of "ethernet", "pcie", "te", "loopback", "fibm".
    #[pyo3(get, set)]
    pub kind: String,
    /// EPL for Ethernet ports, PEP for PCIe ports.
    #[pyo3(get, set)]
    pub block: u8,
    #[pyo3(get, set)]
    pub lane: u8,
}

#[pymethods]
impl PyPort {
    #[new]
    #[pyo3(signature = (physical_id, fabric_pos, speed_mbps, quad=false, kind="ethernet".to_string(), block=None, lane=None))]
    fn new(
        physical_id: u32,
        fabric_pos: usize,
        speed_mbps: u32,
        quad: bool,
        kind: String,
        block: Option<u8>,
        lane: Option<u8>,
    ) -> Self {
        Self {
            physical_id,
            fabric_pos,
            speed_mbps,
            quad,
            kind,
            block: block.unwrap_or((fabric_pos / 4) as u8),
            lane: lane.unwrap_or((fabric_pos % 4) as u8),
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "Port(physical_id={}, fabric_pos={}, speed_mbps={}, quad={}, kind={:?})",
            self.physical_id, self.fabric_pos, self.speed_mbps, self.quad, self.kind
        )
    }
}

impl PyPort {
    fn to_port(&self) -> PyResult<Port> {
        let kind = match self.kind.to_ascii_lowercase().as_str() {
            "ethernet" => PortKind::Ethernet {
                epl: self.block,
                lane: self.lane,
            },
            "pcie" => PortKind::Pcie { pep: self.block },
            "te" => PortKind::TunnelEngine,
            "loopback" => PortKind::Loopback,
            "fibm" => PortKind::Fibm,
            other => {
                return Err(PyValueError::new_err(format!(
                    "unknown port kind {:?}",
                    other
                )))
            }
        };
        Ok(Port::new(
            self.physical_id,
            self.fabric_pos,
            self.speed_mbps,
            self.quad,
            kind,
        ))
    }
}

#[pyclass(name = "PortSpeedInfo")]
#[derive(Clone, Debug)]
pub struct PyPortSpeedInfo {
    #[pyo3(get)]
    pub assigned_speed: u32,
    #[pyo3(get)]
    pub single_lane_speed: u32,
    #[pyo3(get)]
    pub multi_lane_speed: u32,
    #[pyo3(get)]
    pub reserved_speed: u32,
    #[pyo3(get)]
    pub pre_reserved_speed: u32,
    #[pyo3(get)]
    pub is_quad: bool,
}

impl From<PortSpeedInfo> for PyPortSpeedInfo {
    fn from(info: PortSpeedInfo) -> Self {
        Self {
            assigned_speed: info.assigned_speed,
            single_lane_speed: info.single_lane_speed,
            multi_lane_speed: info.multi_lane_speed,
            reserved_speed: info.reserved_speed,
            pre_reserved_speed: info.pre_reserved_speed,
            is_quad: info.is_quad,
        }
    }
}

#[pymethods]
impl PyPortSpeedInfo {
    fn __repr__(&self) -> String {
        format!(
            "PortSpeedInfo(assigned={}, reserved={}, pre_reserved={}, quad={})",
            self.assigned_speed, self.reserved_speed, self.pre_reserved_speed, self.is_quad
        )
    }
}

/// Scheduler driving a simulated register file.
#[pyclass(name = "Scheduler")]
pub struct PyScheduler {
    inner: Scheduler,
    regs: SharedRegisters,
}

#[pymethods]
impl PyScheduler {
    #[new]
    #[pyo3(signature = (clock_mhz, schedule_length=None, mode="static", allow_update_violation=false, verbosity=0))]
    fn new(
        clock_mhz: f64,
        schedule_length: Option<usize>,
        mode: &str,
        allow_update_violation: bool,
        verbosity: u8,
    ) -> PyResult<Self> {
        let config = SchedulerConfig {
            mode: SchedulerMode::parse(mode).map_err(to_py_err)?,
            schedule_length,
            allow_update_violation,
            verbosity,
            ..SchedulerConfig::default()
        };
        let regs = SharedRegisters::new();
        let inner = Scheduler::new(
            config,
            Box::new(regs.clone()),
            Box::new(FixedClock::new(clock_mhz)),
        );
        Ok(Self { inner, regs })
    }

    fn init_scheduler(&self, ports: Vec<PyPort>) -> PyResult<()> {
        let ports = ports.iter().map(PyPort::to_port).collect::<PyResult<Vec<_>>>()?;
        self.inner.init_scheduler(ports).map_err(to_py_err)
    }

    fn regenerate_schedule(&self) -> PyResult<()> {
        self.inner.regenerate_schedule().map_err(to_py_err)
    }

    #[pyo3(signature = (port, speed_mbps, quad=false))]
    fn update_sched_port(&self, port: u32, speed_mbps: u32, quad: bool) -> PyResult<()> {
        self.inner
            .update_sched_port(port, speed_mbps, quad)
            .map_err(to_py_err)
    }

    #[pyo3(signature = (port, speed_mbps, quad=false))]
    fn reserve_bw(&self, port: u32, speed_mbps: u32, quad: bool) -> PyResult<()> {
        self.inner.reserve_bw(port, speed_mbps, quad).map_err(to_py_err)
    }

    #[pyo3(signature = (port, speed_mbps, quad=false))]
    fn pre_reserve_bw(&self, port: u32, speed_mbps: u32, quad: bool) -> PyResult<()> {
        self.inner
            .pre_reserve_bw(port, speed_mbps, quad)
            .map_err(to_py_err)
    }

    #[pyo3(signature = (port, speed_mbps, quad=false))]
    fn reserve_bw_for_negotiated_port(
        &self,
        port: u32,
        speed_mbps: u32,
        quad: bool,
    ) -> PyResult<()> {
        self.inner
            .reserve_bw_for_negotiated_port(port, speed_mbps, quad)
            .map_err(to_py_err)
    }

    fn get_port_speed_info(&self, port: u32) -> PyResult<PyPortSpeedInfo> {
        self.inner
            .get_port_speed_info(port)
            .map(PyPortSpeedInfo::from)
            .map_err(to_py_err)
    }

    fn swap_qpc_bandwidth(&self, a: usize, b: usize) -> PyResult<()> {
        self.inner.swap_qpc_bandwidth(a, b).map_err(to_py_err)
    }

    fn map_physical_to_fabric(&self, port: u32) -> PyResult<usize> {
        self.inner.map_physical_to_fabric(port).map_err(to_py_err)
    }

    fn map_fabric_to_physical(&self, fabric: usize) -> PyResult<u32> {
        self.inner.map_fabric_to_physical(fabric).map_err(to_py_err)
    }

    fn schedule_length(&self) -> Option<usize> {
        self.inner.schedule_length()
    }

    /// Owner of every slot of the active ring (`None` for idle).
    fn ring(&self) -> Vec<Option<u32>> {
        self.inner
            .active_snapshot()
            .map(|s| s.slots.iter().map(|slot| slot.owner).collect())
            .unwrap_or_default()
    }

    /// Ring page the simulated fabric currently walks.
    fn active_page(&self) -> Option<u64> {
        self.regs.get(SCHED_ACTIVE_PAGE)
    }

    fn generation(&self) -> u64 {
        self.inner.generation()
    }
}

/// The fabric_sched Python module.
#[pymodule]
fn fabric_sched(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyPort>()?;
    m.add_class::<PyPortSpeedInfo>()?;
    m.add_class::<PyScheduler>()?;
    Ok(())
}
