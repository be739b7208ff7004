//! Loads continuity inputs from a [`ProjectStore`] and resolves them.
//!
//! Nothing is cached: every call re-reads the render listing and the
//! sequence record.

use std::sync::Arc;

use reelforge_core::continuity::{self, ContinuityInputs, ContinuityResolution};
use reelforge_core::error::CoreResult;
use reelforge_core::project_layout::validate_segment;
use reelforge_core::shot_order::order_shots;
use reelforge_core::types::Variation;

use crate::store::ProjectStore;

#[derive(Clone)]
pub struct ContinuityResolver {
    store: Arc<dyn ProjectStore>,
}

/// Inputs read for one resolution, owned so they can be borrowed as
/// [`ContinuityInputs`].
struct Loaded {
    order: Vec<String>,
    renders: continuity::RenderIndex,
    sequence: continuity::SequenceRecord,
    continuity_disabled: bool,
}

impl Loaded {
    fn inputs(&self) -> ContinuityInputs<'_> {
        ContinuityInputs {
            order: &self.order,
            renders: &self.renders,
            sequence: &self.sequence,
            continuity_disabled: self.continuity_disabled,
        }
    }
}

impl ContinuityResolver {
    pub fn new(store: Arc<dyn ProjectStore>) -> Self {
        Self { store }
    }

    /// Resolution for variations A through D.
    pub async fn resolve_shot(
        &self,
        project_id: &str,
        shot_id: &str,
    ) -> CoreResult<Vec<ContinuityResolution>> {
        let loaded = self.load(project_id, shot_id).await?;
        Ok(continuity::resolve_shot(loaded.inputs(), shot_id))
    }

    pub async fn resolve_variation(
        &self,
        project_id: &str,
        shot_id: &str,
        variation: Variation,
    ) -> CoreResult<ContinuityResolution> {
        let loaded = self.load(project_id, shot_id).await?;
        let resolution = continuity::resolve_variation(loaded.inputs(), shot_id, variation);
        tracing::debug!(
            project_id,
            shot_id,
            variation = %variation,
            source = ?resolution.first.source,
            reason = ?resolution.first.reason,
            "Continuity resolved",
        );
        Ok(resolution)
    }

    async fn load(&self, project_id: &str, shot_id: &str) -> CoreResult<Loaded> {
        validate_segment("shotId", shot_id)?;

        let sequence = self.store.read_sequence(project_id).await?;
        let renders = self.store.list_renders(project_id).await?;
        let mut shot_ids = self.store.list_shot_ids(project_id).await?;
        if !shot_ids.iter().any(|id| id == shot_id) {
            shot_ids.push(shot_id.to_string());
        }
        let order = order_shots(&shot_ids, sequence.editorial_order.as_deref());

        let continuity_disabled = self
            .store
            .load_shot(project_id, shot_id)
            .await?
            .map(|record| record.continuity_disabled)
            .unwrap_or(false);

        Ok(Loaded {
            order,
            renders,
            sequence,
            continuity_disabled,
        })
    }
}
