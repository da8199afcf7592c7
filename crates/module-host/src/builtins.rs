//! Built-in capability/output/model implementations.
//!
//! Deterministic, in-process stand-ins wired through the same traits as
//! production host objects. Useful as defaults for development and as
//! fixtures in tests.

use std::sync::{Arc, Mutex};

use module_abi::{Capability, CapabilityError, Model, Output};

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Fills the destination with a single repeated byte. Parameter: `value`.
pub struct ConstantCapability {
    value: u8,
}

impl ConstantCapability {
    pub fn new(value: u8) -> Self {
        Self { value }
    }
}

impl Capability for ConstantCapability {
    fn set_parameter(&mut self, name: &str, value: f64) -> Result<(), CapabilityError> {
        match name {
            "value" => {
                self.value = value as u8;
                Ok(())
            }
            _ => Err(CapabilityError::InvalidParameter { name: name.into() }),
        }
    }

    fn generate(&mut self, dest: &mut [u8]) -> Result<usize, CapabilityError> {
        dest.fill(self.value);
        Ok(dest.len())
    }
}

/// Deterministic pseudo-random byte source (xorshift64*). Parameter: `seed`.
pub struct XorShiftCapability {
    state: u64,
}

impl XorShiftCapability {
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }
}

impl Capability for XorShiftCapability {
    fn set_parameter(&mut self, name: &str, value: f64) -> Result<(), CapabilityError> {
        match name {
            "seed" => {
                *self = Self::new(value as u64);
                Ok(())
            }
            _ => Err(CapabilityError::InvalidParameter { name: name.into() }),
        }
    }

    fn generate(&mut self, dest: &mut [u8]) -> Result<usize, CapabilityError> {
        for byte in dest.iter_mut() {
            *byte = (self.next() >> 56) as u8;
        }
        Ok(dest.len())
    }
}

/// Returns one fixed payload per `generate`. The content length is
/// intrinsic: a destination smaller than the payload fails with
/// `BufferTooSmall` and nothing is written.
pub struct PayloadCapability {
    payload: Vec<u8>,
}

impl PayloadCapability {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

impl Capability for PayloadCapability {
    fn set_parameter(&mut self, name: &str, _value: f64) -> Result<(), CapabilityError> {
        Err(CapabilityError::InvalidParameter { name: name.into() })
    }

    fn generate(&mut self, dest: &mut [u8]) -> Result<usize, CapabilityError> {
        if dest.len() < self.payload.len() {
            return Err(CapabilityError::BufferTooSmall {
                needed: self.payload.len(),
                capacity: dest.len(),
            });
        }
        dest[..self.payload.len()].copy_from_slice(&self.payload);
        Ok(self.payload.len())
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// Records every consumed buffer behind a shared handle, so the host (or a
/// test) can inspect emissions after the run. Clones share storage.
#[derive(Clone, Default)]
pub struct BufferOutput {
    buffers: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl BufferOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies of everything consumed so far, in consumption order.
    pub fn buffers(&self) -> Vec<Vec<u8>> {
        self.buffers.lock().unwrap().clone()
    }

    /// Drain recorded buffers, leaving the sink empty.
    pub fn take(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.buffers.lock().unwrap())
    }
}

impl Output for BufferOutput {
    fn consume(&mut self, data: &[u8]) -> Result<(), CapabilityError> {
        self.buffers.lock().unwrap().push(data.to_vec());
        Ok(())
    }
}

/// Emits each consumed buffer as a structured tracing event.
#[derive(Default)]
pub struct SerialOutput;

impl Output for SerialOutput {
    fn consume(&mut self, data: &[u8]) -> Result<(), CapabilityError> {
        tracing::info!(
            bytes = data.len(),
            payload = %String::from_utf8_lossy(data),
            "output.consume"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// Copies the input buffer through unchanged.
#[derive(Default)]
pub struct IdentityModel;

impl Model for IdentityModel {
    fn infer(&mut self, input: &[u8], output: &mut [u8]) -> Result<usize, CapabilityError> {
        if output.len() < input.len() {
            return Err(CapabilityError::BufferTooSmall {
                needed: input.len(),
                capacity: output.len(),
            });
        }
        output[..input.len()].copy_from_slice(input);
        Ok(input.len())
    }
}
