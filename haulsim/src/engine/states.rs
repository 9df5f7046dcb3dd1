use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TruckState {
    #[default]
    Idle,
    MovingEmpty,
    Waiting,
    Loading,
    MovingLoaded,
    Unloading,
    Repair,
    Refueling,
    Lunch,
    PlannedIdle,
    BlastingIdle,
}

impl TruckState {
    pub fn is_moving(self) -> bool {
        matches!(self, TruckState::MovingEmpty | TruckState::MovingLoaded)
    }

    /// States in which the truck wears, can break down and may be sent to lunch.
    pub fn is_working(self) -> bool {
        matches!(self, TruckState::MovingEmpty | TruckState::MovingLoaded | TruckState::Unloading)
    }

    /// States a replan may interrupt.
    pub fn is_interruptible(self) -> bool {
        matches!(self, TruckState::MovingEmpty | TruckState::Waiting)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ShovelState {
    #[default]
    Waiting,
    Loading,
    Repair,
    PlannedIdle,
    BlastingIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum UnloadState {
    #[default]
    Open,
    /// Never entered by the engine.
    Closed,
    Repair,
    BlastingIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FuelStationState {
    #[default]
    Waiting,
    Refueling,
}
