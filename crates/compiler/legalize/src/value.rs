//! # Sources and Modifiers
//!
//! A [`Source`] is a read of one component of a definition, optionally
//! transformed by a unary sign modifier. Modifiers are free on the target
//! hardware, so passes prefer them over materialized `Neg`/`Abs` instructions.

use std::fmt;

use crate::ValueId;

/// A unary transform applied to a source when it is read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Modifier {
    #[default]
    None,
    Neg,
    Abs,
}

impl Modifier {
    /// Composes `outer(inner(x))` into a single modifier.
    ///
    /// Returns `None` when the result is not representable (`-|x|`).
    pub const fn compose(outer: Self, inner: Self) -> Option<Self> {
        match (outer, inner) {
            (Self::None, m) => Some(m),
            (Self::Neg, Self::None) => Some(Self::Neg),
            (Self::Neg, Self::Neg) => Some(Self::None),
            (Self::Neg, Self::Abs) => None,
            (Self::Abs, _) => Some(Self::Abs),
        }
    }

    /// Applies the modifier to a scalar
    pub fn apply(self, value: f32) -> f32 {
        match self {
            Self::None => value,
            Self::Neg => -value,
            Self::Abs => value.abs(),
        }
    }
}

/// A read of a definition
///
/// # Design Notes
///
/// - `component` selects one lane of a multi-component definition (loads)
/// - Sources are many-to-one with definitions and never own them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Source {
    pub value: ValueId,
    pub component: u8,
    pub modifier: Modifier,
}

impl Source {
    /// Reads component 0 without modifier
    pub const fn new(value: ValueId) -> Self {
        Self {
            value,
            component: 0,
            modifier: Modifier::None,
        }
    }

    /// Reads the given component without modifier
    pub const fn component(value: ValueId, component: u8) -> Self {
        Self {
            value,
            component,
            modifier: Modifier::None,
        }
    }

    pub const fn negated(self) -> Self {
        Self {
            modifier: Modifier::Neg,
            ..self
        }
    }

    pub const fn abs(self) -> Self {
        Self {
            modifier: Modifier::Abs,
            ..self
        }
    }

    pub const fn with_modifier(self, modifier: Modifier) -> Self {
        Self { modifier, ..self }
    }

    /// Substitutes this source's definition by `replacement`.
    ///
    /// `self` must read a single-component definition that is equal to
    /// `replacement`; the result reads the replacement's component with both
    /// modifiers composed. Returns `None` when the composition is not
    /// representable.
    pub const fn forward_through(self, replacement: Self) -> Option<Self> {
        match Modifier::compose(self.modifier, replacement.modifier) {
            Some(modifier) => Some(Self {
                value: replacement.value,
                component: replacement.component,
                modifier,
            }),
            None => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const LANES: [char; 4] = ['x', 'y', 'z', 'w'];
        let lane = LANES.get(self.component as usize).copied().unwrap_or('?');
        match self.modifier {
            Modifier::None => write!(f, "%{}.{lane}", self.value.index()),
            Modifier::Neg => write!(f, "-%{}.{lane}", self.value.index()),
            Modifier::Abs => write!(f, "|%{}.{lane}|", self.value.index()),
        }
    }
}
