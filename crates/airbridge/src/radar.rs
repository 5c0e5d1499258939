// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Derived radar view over the device-link queries.
//!
//! Every read refreshes the DS snapshot first, then issues the individual
//! position queries under one running deadline, so a caller's timeout bounds
//! the whole composite operation.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::ds::device_link::{
    DeviceLinkClient, HousePosition, MovingAircraftPosition, MovingGroundUnitPosition,
    ShipPosition, StationaryObjectPosition,
};
use crate::error::Error;

/// Snapshot of everything currently moving.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AllMovingActorsPositions {
    pub aircrafts: Vec<MovingAircraftPosition>,
    pub ground_units: Vec<MovingGroundUnitPosition>,
    pub ships: Vec<ShipPosition>,
}

impl AllMovingActorsPositions {
    pub fn is_empty(&self) -> bool {
        self.aircrafts.is_empty() && self.ground_units.is_empty() && self.ships.is_empty()
    }
}

/// Snapshot of everything standing still.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AllStationaryActorsPositions {
    pub stationary_objects: Vec<StationaryObjectPosition>,
    pub houses: Vec<HousePosition>,
    pub ships: Vec<ShipPosition>,
}

/// Tracks the remaining budget across a composite read.
struct Deadline {
    at: Option<tokio::time::Instant>,
}

impl Deadline {
    fn new(timeout: Option<Duration>) -> Self {
        Self { at: timeout.map(|t| tokio::time::Instant::now() + t) }
    }

    fn remaining(&self) -> Result<Option<Duration>, Error> {
        match self.at {
            None => Ok(None),
            Some(at) => {
                let now = tokio::time::Instant::now();
                if now >= at {
                    Err(Error::Timeout)
                } else {
                    Ok(Some(at - now))
                }
            }
        }
    }
}

pub struct Radar {
    client: Arc<DeviceLinkClient>,
}

impl Radar {
    pub fn new(client: Arc<DeviceLinkClient>) -> Self {
        Self { client }
    }

    pub async fn get_moving_ships_positions(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Vec<ShipPosition>, Error> {
        self.client.refresh_radar().await?;
        let ships = self.client.get_all_ships_positions(timeout).await?;
        Ok(ships.into_iter().filter(|s| !s.is_stationary).collect())
    }

    pub async fn get_stationary_ships_positions(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Vec<ShipPosition>, Error> {
        self.client.refresh_radar().await?;
        let ships = self.client.get_all_ships_positions(timeout).await?;
        Ok(ships.into_iter().filter(|s| s.is_stationary).collect())
    }

    pub async fn get_all_ships_positions(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Vec<ShipPosition>, Error> {
        self.client.refresh_radar().await?;
        self.client.get_all_ships_positions(timeout).await
    }

    pub async fn get_moving_aircrafts_positions(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Vec<MovingAircraftPosition>, Error> {
        self.client.refresh_radar().await?;
        self.client.get_all_moving_aircrafts_positions(timeout).await
    }

    pub async fn get_moving_ground_units_positions(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Vec<MovingGroundUnitPosition>, Error> {
        self.client.refresh_radar().await?;
        self.client.get_all_moving_ground_units_positions(timeout).await
    }

    pub async fn get_stationary_objects_positions(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Vec<StationaryObjectPosition>, Error> {
        self.client.refresh_radar().await?;
        self.client.get_all_stationary_objects_positions(timeout).await
    }

    pub async fn get_all_houses_positions(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Vec<HousePosition>, Error> {
        self.client.refresh_radar().await?;
        self.client.get_all_houses_positions(timeout).await
    }

    pub async fn get_all_moving_actors_positions(
        &self,
        timeout: Option<Duration>,
    ) -> Result<AllMovingActorsPositions, Error> {
        self.client.refresh_radar().await?;
        let deadline = Deadline::new(timeout);

        let aircrafts = self
            .client
            .get_all_moving_aircrafts_positions(deadline.remaining()?)
            .await?;
        let ground_units = self
            .client
            .get_all_moving_ground_units_positions(deadline.remaining()?)
            .await?;
        let ships = self.client.get_all_ships_positions(deadline.remaining()?).await?;
        let ships = ships.into_iter().filter(|s| !s.is_stationary).collect();

        Ok(AllMovingActorsPositions { aircrafts, ground_units, ships })
    }

    pub async fn get_all_stationary_actors_positions(
        &self,
        timeout: Option<Duration>,
    ) -> Result<AllStationaryActorsPositions, Error> {
        self.client.refresh_radar().await?;
        let deadline = Deadline::new(timeout);

        let stationary_objects = self
            .client
            .get_all_stationary_objects_positions(deadline.remaining()?)
            .await?;
        let houses = self.client.get_all_houses_positions(deadline.remaining()?).await?;
        let ships = self.client.get_all_ships_positions(deadline.remaining()?).await?;
        let ships = ships.into_iter().filter(|s| s.is_stationary).collect();

        Ok(AllStationaryActorsPositions { stationary_objects, houses, ships })
    }
}

#[cfg(test)]
#[path = "radar_tests.rs"]
mod tests;
