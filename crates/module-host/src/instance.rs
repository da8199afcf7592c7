//! Runtime instance: one loaded module with its resolved bindings.
//!
//! `run` executes the body synchronously on the calling thread; every
//! capability/output call the module issues reaches the host one at a
//! time, in issue order, with no buffering in between. State machine:
//! `Loaded → Running → {Completed | Faulted}`, and both end states are
//! terminal.

use std::fmt;

use module_abi::{Capability, CapabilityError, Model, Output};

use crate::artifact::{Artifact, Op};
use crate::errors::RunError;
use crate::registry::LogHook;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Loaded,
    Running,
    Completed,
    Faulted,
}

/// Summary of one completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub ops_executed: usize,
    pub consume_calls: usize,
    pub bytes_emitted: u64,
}

pub struct RuntimeInstance {
    state: InstanceState,
    ops: Vec<Op>,
    capabilities: Vec<Box<dyn Capability>>,
    outputs: Vec<Box<dyn Output>>,
    models: Vec<Box<dyn Model>>,
    log: Option<LogHook>,
    registers: Vec<Option<Vec<u8>>>,
}

// The bound host objects are trait objects, so only the shape is shown.
impl fmt::Debug for RuntimeInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeInstance")
            .field("state", &self.state)
            .field("ops", &self.ops.len())
            .field("capabilities", &self.capabilities.len())
            .field("outputs", &self.outputs.len())
            .field("models", &self.models.len())
            .finish_non_exhaustive()
    }
}

impl RuntimeInstance {
    pub(crate) fn new(
        artifact: Artifact,
        capabilities: Vec<Box<dyn Capability>>,
        outputs: Vec<Box<dyn Output>>,
        models: Vec<Box<dyn Model>>,
        log: Option<LogHook>,
    ) -> Self {
        let registers = vec![None; artifact.register_count as usize];
        Self {
            state: InstanceState::Loaded,
            ops: artifact.ops,
            capabilities,
            outputs,
            models,
            log,
            registers,
        }
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// Execute the module body to completion.
    ///
    /// A fault leaves the instance terminal: later calls fail immediately
    /// without touching any capability. The `&mut` receiver makes reentrant
    /// calls unrepresentable.
    pub fn run(&mut self) -> Result<RunReport, RunError> {
        match self.state {
            InstanceState::Faulted => return Err(RunError::InstanceFaulted),
            InstanceState::Completed => return Err(RunError::InstanceFinished),
            InstanceState::Loaded | InstanceState::Running => {}
        }
        self.state = InstanceState::Running;
        tracing::debug!(ops = self.ops.len(), "run.start");

        let ops = std::mem::take(&mut self.ops);
        let mut report = RunReport {
            ops_executed: 0,
            consume_calls: 0,
            bytes_emitted: 0,
        };

        let mut fault: Option<RunError> = None;
        for (op_index, op) in ops.iter().enumerate() {
            if let Err(source) = self.exec(op, &mut report) {
                fault = Some(RunError::ModuleFault { op_index, source });
                break;
            }
            report.ops_executed += 1;
        }
        self.ops = ops;

        match fault {
            Some(err) => {
                self.state = InstanceState::Faulted;
                tracing::warn!(error = %err, "run.fault");
                Err(err)
            }
            None => {
                self.state = InstanceState::Completed;
                tracing::info!(
                    ops = report.ops_executed,
                    consumes = report.consume_calls,
                    bytes = report.bytes_emitted,
                    "run.end"
                );
                Ok(report)
            }
        }
    }

    fn exec(&mut self, op: &Op, report: &mut RunReport) -> Result<(), CapabilityError> {
        match op {
            Op::LoadLiteral { reg, bytes } => {
                self.registers[*reg as usize] = Some(bytes.clone());
            }
            Op::SetParam { slot, name, value } => {
                self.capabilities[*slot as usize].set_parameter(name, *value)?;
            }
            Op::Generate { slot, reg, len } => {
                let mut buf = vec![0u8; *len as usize];
                let written = self.capabilities[*slot as usize].generate(&mut buf)?;
                buf.truncate(written);
                self.registers[*reg as usize] = Some(buf);
            }
            Op::Infer {
                slot,
                input_reg,
                reg,
                len,
            } => {
                let input = self.read_register(*input_reg)?.to_vec();
                let mut buf = vec![0u8; *len as usize];
                let written = self.models[*slot as usize].infer(&input, &mut buf)?;
                buf.truncate(written);
                self.registers[*reg as usize] = Some(buf);
            }
            Op::Consume { slot, reg } => {
                let data = self.read_register(*reg)?.to_vec();
                self.outputs[*slot as usize].consume(&data)?;
                report.consume_calls += 1;
                report.bytes_emitted += data.len() as u64;
            }
            Op::Log { message } => {
                // Missing log hook is a no-op, not a fault.
                if let Some(hook) = &self.log {
                    hook(message);
                }
            }
        }
        Ok(())
    }

    fn read_register(&self, reg: u32) -> Result<&[u8], CapabilityError> {
        self.registers
            .get(reg as usize)
            .and_then(|r| r.as_deref())
            .ok_or_else(|| CapabilityError::failed(format!("register r{reg} is empty")))
    }
}
