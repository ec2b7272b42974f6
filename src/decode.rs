//! Conversion of raw register words into typed values, and the guard in front of every write.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::features::{ActiveRegisterSet, FeatureSet};
use crate::planner::ReadSpan;
use crate::registers::{Feature, RegisterIndex, RegisterKind, Value};

pub const AUDIT_TARGET: &str = "aerona3_tools::audit";

/// Why a register value is considered invalid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InvalidReason {
    /// The raw value lies outside of the valid range of the register.
    OutOfRange,
    /// The raw value does not correspond to any of the known labels.
    UnmappedEnum,
    /// The device returned fewer words than necessary to decode the register.
    Truncated,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct DecodedValue {
    pub register: RegisterIndex,
    pub raw_words: Vec<u16>,
    /// Raw integer as read from the device, before scaling.
    pub raw: Option<i64>,
    pub value: Option<Value>,
    pub invalid: Option<InvalidReason>,
}

impl DecodedValue {
    pub fn is_valid(&self) -> bool {
        self.invalid.is_none()
    }

    /// The typed value, but only if it is valid.
    pub fn valid_value(&self) -> Option<Value> {
        self.value.filter(|_| self.is_valid())
    }

    fn mark_invalid(mut self, reason: InvalidReason) -> Self {
        debug!(
            message = "register value is invalid",
            register.id = self.register.id(),
            raw = self.raw,
            %reason
        );
        self.invalid = Some(reason);
        self
    }
}

/// Decode the words of a single register.
pub fn decode_register(register: RegisterIndex, words: &[u16]) -> DecodedValue {
    let data_type = register.data_type();
    let result = DecodedValue {
        register,
        raw_words: words.to_vec(),
        raw: None,
        value: None,
        invalid: None,
    };
    let Some(raw) = data_type.raw_from_words(words) else {
        return result.mark_invalid(InvalidReason::Truncated);
    };
    let mut result = DecodedValue { raw: Some(raw), ..result };
    result.value = if register.kind() == RegisterKind::Coil {
        Some(Value::Flag(raw != 0))
    } else if let Some(labels) = register.labels() {
        let label = usize::try_from(raw).ok().and_then(|i| labels.get(i));
        match label {
            Some(label) => Some(Value::Label(label)),
            None => return result.mark_invalid(InvalidReason::UnmappedEnum),
        }
    } else {
        Some(Value::Number(data_type.to_engineering(raw)))
    };
    let below = register.minimum().is_some_and(|min| raw < min);
    let above = register.maximum().is_some_and(|max| raw > max);
    if below || above {
        return result.mark_invalid(InvalidReason::OutOfRange);
    }
    result
}

/// Decode every active register that lies within the span.
///
/// `words` holds the response to the read of the span. Registers the response is too short for
/// are reported as truncated.
pub fn decode(span: &ReadSpan, words: &[u16], active: &ActiveRegisterSet) -> Vec<DecodedValue> {
    active
        .iter()
        .filter(|r| span.covers(*r))
        .map(|register| {
            let offset = usize::from(register.address() - span.start);
            let width = usize::from(register.data_type().words());
            let available = words.get(offset..).unwrap_or(&[]);
            decode_register(register, &available[..width.min(available.len())])
        })
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum DenyReason {
    #[strum(serialize = "no such register")]
    Unknown,
    #[strum(serialize = "the register is read-only")]
    NotWritable,
    #[strum(serialize = "the register is write protected by configuration")]
    WriteProtected,
}

#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    #[error("writing `{id}` is denied: {reason}")]
    Denied { id: String, reason: DenyReason },
    #[error("{value} is not a valid value for `{register}`")]
    OutOfRange { register: RegisterIndex, value: f64 },
    #[error("`{0}` requires the `{1}` feature, which is not installed")]
    FeatureDisabled(RegisterIndex, Feature),
}

/// A write that has passed the guard and is ready to be sent to the device.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PreparedWrite {
    pub register: RegisterIndex,
    pub value: f64,
    pub raw: i64,
    pub word: u16,
}

/// Check that a write is allowed and convert the engineering value to the raw word.
///
/// Nothing here talks to the device: a write that fails these checks never reaches the transport.
pub fn prepare_write(
    id: &str,
    value: f64,
    features: &FeatureSet,
    write_protected: &BTreeSet<String>,
) -> Result<PreparedWrite, WriteError> {
    let result = check_write(id, value, features, write_protected);
    match (&result, RegisterIndex::from_id(id)) {
        (Ok(write), Some(register)) if register.is_critical() => {
            warn!(
                target: AUDIT_TARGET,
                message = "writing a critical register",
                register.id = id,
                value,
                raw = write.raw
            );
        }
        (Err(error), Some(register)) if register.is_critical() => {
            warn!(
                target: AUDIT_TARGET,
                message = "rejected a write to a critical register",
                register.id = id,
                value,
                error = (error as &dyn std::error::Error)
            );
        }
        (Err(error), _) => {
            info!(
                message = "rejected a register write",
                register.id = id,
                value,
                error = (error as &dyn std::error::Error)
            );
        }
        (Ok(_), _) => {}
    }
    result
}

fn check_write(
    id: &str,
    value: f64,
    features: &FeatureSet,
    write_protected: &BTreeSet<String>,
) -> Result<PreparedWrite, WriteError> {
    let deny = |reason| WriteError::Denied { id: id.to_string(), reason };
    let register = RegisterIndex::from_id(id).ok_or_else(|| deny(DenyReason::Unknown))?;
    if !register.is_writable() {
        return Err(deny(DenyReason::NotWritable));
    }
    if write_protected.contains(id) {
        return Err(deny(DenyReason::WriteProtected));
    }
    if let Some(feature) = register.required_feature() {
        if !crate::features::is_active(register, features) {
            return Err(WriteError::FeatureDisabled(register, feature));
        }
    }
    let out_of_range = || WriteError::OutOfRange { register, value };
    if !value.is_finite() {
        return Err(out_of_range());
    }
    let data_type = register.data_type();
    let raw = if register.kind() == RegisterKind::Coil {
        if value == 0.0 {
            0
        } else if value == 1.0 {
            1
        } else {
            return Err(out_of_range());
        }
    } else {
        data_type.to_raw(value)
    };
    if register.minimum().is_some_and(|min| raw < min)
        || register.maximum().is_some_and(|max| raw > max)
        || register.labels().is_some_and(|l| usize::try_from(raw).map_or(true, |i| i >= l.len()))
    {
        return Err(out_of_range());
    }
    let word = data_type.encode_word(raw).ok_or_else(out_of_range)?;
    Ok(PreparedWrite { register, value, raw, word })
}
