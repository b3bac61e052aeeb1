//! Update priorities.
//!
//! A [`Lanes`] value is a bitmask where each bit is one urgency class ("lane").
//! Lower bits are more urgent.

use crate::scheduler::PriorityLevel;
use core::{
	fmt::{self, Debug, Formatter},
	ops::{BitAnd, BitOr, BitOrAssign},
};

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Lanes(u32);

/// A single-bit [`Lanes`] value.
pub type Lane = Lanes;

impl Lanes {
	pub const NONE: Self = Self(0);
	pub const SYNC: Self = Self(0b0000_0000_0000_0000_0000_0000_0000_0010);
	pub const INPUT_CONTINUOUS: Self = Self(0b0000_0000_0000_0000_0000_0000_0000_1000);
	pub const DEFAULT: Self = Self(0b0000_0000_0000_0000_0000_0000_0010_0000);
	pub const IDLE: Self = Self(0b0010_0000_0000_0000_0000_0000_0000_0000);

	const NON_IDLE: Self = Self(0b0000_1111_1111_1111_1111_1111_1111_1111);

	#[must_use]
	pub const fn bits(self) -> u32 {
		self.0
	}

	#[must_use]
	pub const fn is_empty(self) -> bool {
		self.0 == 0
	}

	#[must_use]
	pub const fn intersects(self, other: Self) -> bool {
		self.0 & other.0 != 0
	}

	/// Whether every lane of `subset` is in `self`.
	#[must_use]
	pub const fn contains(self, subset: Self) -> bool {
		self.0 & subset.0 == subset.0
	}

	#[must_use]
	pub const fn merge(self, other: Self) -> Self {
		Self(self.0 | other.0)
	}

	#[must_use]
	pub const fn remove(self, other: Self) -> Self {
		Self(self.0 & !other.0)
	}

	/// The most urgent lane in `self`, or [`Lanes::NONE`].
	#[must_use]
	pub const fn highest_priority_lane(self) -> Lane {
		Self(self.0 & self.0.wrapping_neg())
	}

	#[must_use]
	pub const fn includes_non_idle_work(self) -> bool {
		self.0 & Self::NON_IDLE.0 != 0
	}
}

impl BitOr for Lanes {
	type Output = Self;

	fn bitor(self, rhs: Self) -> Self {
		self.merge(rhs)
	}
}

impl BitOrAssign for Lanes {
	fn bitor_assign(&mut self, rhs: Self) {
		*self = self.merge(rhs);
	}
}

impl BitAnd for Lanes {
	type Output = Self;

	fn bitand(self, rhs: Self) -> Self {
		Self(self.0 & rhs.0)
	}
}

impl Debug for Lanes {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "Lanes({:#b})", self.0)
	}
}

/// Urgency class of an event, and by extension of the updates it causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventPriority {
	/// Clicks, key presses and similar user intents.
	Discrete,
	/// Pointer movement, scrolling and other high-frequency input.
	Continuous,
	Default,
	Idle,
}

impl EventPriority {
	#[must_use]
	pub const fn lane(self) -> Lane {
		match self {
			Self::Discrete => Lanes::SYNC,
			Self::Continuous => Lanes::INPUT_CONTINUOUS,
			Self::Default => Lanes::DEFAULT,
			Self::Idle => Lanes::IDLE,
		}
	}

	/// Classifies the most urgent lane in `lanes`.
	#[must_use]
	pub fn from_lanes(lanes: Lanes) -> Self {
		fn is_higher_event_priority(a: Lane, b: Lane) -> bool {
			a.0 != 0 && a.0 < b.0
		}

		let lane = lanes.highest_priority_lane();
		if !is_higher_event_priority(Self::Discrete.lane(), lane) {
			Self::Discrete
		} else if !is_higher_event_priority(Self::Continuous.lane(), lane) {
			Self::Continuous
		} else if lane.includes_non_idle_work() {
			Self::Default
		} else {
			Self::Idle
		}
	}

	/// Scheduler priority that work of this class runs at.
	#[must_use]
	pub const fn scheduler_priority(self) -> PriorityLevel {
		match self {
			Self::Discrete => PriorityLevel::Immediate,
			Self::Continuous => PriorityLevel::UserBlocking,
			Self::Default => PriorityLevel::Normal,
			Self::Idle => PriorityLevel::Idle,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::{EventPriority, Lanes};

	#[test]
	fn highest_priority_lane_is_lowest_bit() {
		let lanes = Lanes::DEFAULT | Lanes::IDLE | Lanes::INPUT_CONTINUOUS;
		assert_eq!(lanes.highest_priority_lane(), Lanes::INPUT_CONTINUOUS);
		assert_eq!(Lanes::NONE.highest_priority_lane(), Lanes::NONE);
	}

	#[test]
	fn lanes_classify_into_event_priorities() {
		assert_eq!(EventPriority::from_lanes(Lanes::SYNC | Lanes::DEFAULT), EventPriority::Discrete);
		assert_eq!(EventPriority::from_lanes(Lanes::INPUT_CONTINUOUS), EventPriority::Continuous);
		assert_eq!(EventPriority::from_lanes(Lanes::DEFAULT), EventPriority::Default);
		assert_eq!(EventPriority::from_lanes(Lanes::IDLE), EventPriority::Idle);
	}
}
