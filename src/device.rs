// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! One opened device: the transport plus the capability modules built on
//! top of it.

use std::sync::Arc;

use crate::{
    audio::AudioControl,
    engine::{EngineConfig, StreamEngine},
    error::Result,
    geometry::DeviceGeometry,
    registers::RegisterAccess,
    transport::Transport,
};

/// Owns the shared transport handle. Register access, audio control and
/// the streaming engine all borrow the same `Arc<T>`.
pub struct Device<T> {
    transport: Arc<T>,
    engine: StreamEngine<T>,
}

impl<T: Transport> Device<T> {
    pub fn open(transport: Arc<T>, geometry: DeviceGeometry) -> Result<Self> {
        Self::with_config(transport, geometry, EngineConfig::default())
    }

    pub fn with_config(
        transport: Arc<T>,
        geometry: DeviceGeometry,
        config: EngineConfig,
    ) -> Result<Self> {
        let engine = StreamEngine::with_config(transport.clone(), geometry, config)?;
        Ok(Self { transport, engine })
    }

    /// Typed register access, see
    /// [`RegisterAccess`](crate::registers::RegisterAccess).
    pub fn registers(&self) -> &T {
        &self.transport
    }

    pub fn audio(&self) -> &AudioControl<T> {
        self.engine.audio()
    }

    pub fn engine(&self) -> &StreamEngine<T> {
        &self.engine
    }

    pub fn geometry(&self) -> &DeviceGeometry {
        self.engine.geometry()
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Current device time in 10 MHz ticks.
    pub fn clock(&self) -> Result<u64> {
        self.transport.read_clock()
    }
}
