//! Accumulated camera-rig transform.

use crate::persistence::PersistenceStore;
use log::{error, info};
use shared::{Transform, TransformCandidate, TransformError, Vector2};

/// Transform component a delta applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    PositionX,
    PositionY,
    RotationX,
    RotationY,
}

/// Owns the process-wide transform and its dirty flag.
///
/// Deltas and absolute replacements are validated before any field is
/// written, so a rejected update leaves the previous value intact.
pub struct TransformController {
    transform: Transform,
    dirty: bool,
    delta_scale: f64,
    store: PersistenceStore,
}

impl TransformController {
    /// Loads the persisted transform, or persists and uses the zero transform
    /// when there is none. A failed load falls back to zero as well.
    pub async fn load(store: PersistenceStore, delta_scale: f64) -> Self {
        let transform = match store.load().await {
            Ok(Some(transform)) => {
                info!("Loaded transform from {}", store.path().display());
                transform
            }
            Ok(None) => {
                info!(
                    "No transform at {}, writing defaults",
                    store.path().display()
                );
                store.save(Transform::default());
                Transform::default()
            }
            Err(e) => {
                error!("Failed to load transform: {}; using defaults", e);
                Transform::default()
            }
        };

        Self {
            transform,
            dirty: false,
            delta_scale,
            store,
        }
    }

    pub fn current(&self) -> Transform {
        self.transform
    }

    /// Adds `magnitude * scale` to one component. Rotation around x is kept
    /// in `[0, 360)`. A result that is not finite is rejected and nothing
    /// changes.
    pub fn apply_delta(
        &mut self,
        axis: Axis,
        magnitude: f64,
        scale: f64,
    ) -> Result<(), TransformError> {
        let delta = magnitude * scale;
        if !delta.is_finite() {
            return Err(TransformError::NonFinite { field: "delta" });
        }

        let t = &self.transform;
        let (field, value) = match axis {
            Axis::PositionX => ("position.x", t.position.x + delta),
            Axis::PositionY => ("position.y", t.position.y + delta),
            Axis::RotationX => ("rotation.x", wrap_degrees(t.rotation.x + delta)),
            Axis::RotationY => ("rotation.y", t.rotation.y + delta),
        };
        if !value.is_finite() {
            return Err(TransformError::NonFinite { field });
        }

        match axis {
            Axis::PositionX => self.transform.position.x = value,
            Axis::PositionY => self.transform.position.y = value,
            Axis::RotationX => self.transform.rotation.x = value,
            Axis::RotationY => self.transform.rotation.y = value,
        }
        self.dirty = true;
        Ok(())
    }

    /// Handles a `kmov` payload: position x and y deltas, both or neither.
    pub fn apply_move(&mut self, delta: Vector2) -> Result<(), TransformError> {
        let position = Vector2 {
            x: self.transform.position.x + delta.x * self.delta_scale,
            y: self.transform.position.y + delta.y * self.delta_scale,
        };
        if !position.x.is_finite() {
            return Err(TransformError::NonFinite { field: "position.x" });
        }
        if !position.y.is_finite() {
            return Err(TransformError::NonFinite { field: "position.y" });
        }

        self.transform.position = position;
        self.dirty = true;
        Ok(())
    }

    /// Handles a `krot` payload. Only the x component is used.
    pub fn apply_rotate(&mut self, delta: Vector2) -> Result<(), TransformError> {
        self.apply_delta(Axis::RotationX, delta.x, self.delta_scale)
    }

    /// Replaces the whole transform if every field is finite.
    pub fn apply_absolute(&mut self, candidate: TransformCandidate) -> Result<(), TransformError> {
        self.transform = Transform::try_from(candidate)?;
        self.dirty = true;
        Ok(())
    }

    pub fn save(&self) {
        self.store.save(self.transform);
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns the dirty flag and clears it.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn store(&self) -> &PersistenceStore {
        &self.store
    }
}

/// `rem_euclid` can round up to exactly 360 for tiny negative inputs.
fn wrap_degrees(value: f64) -> f64 {
    let wrapped = value.rem_euclid(360.0);
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}
