use crate::{
    core::{
        engine::Projector,
        event::Event,
        store::{ProjectionStore, ProjectionStoreExt},
    },
    domain::rune::RuneEvent,
    error::Result,
};

pub const RUNE_CHILD_COUNT: &str = "rune_child_count";

/// Counts direct children per parent rune.
pub struct RuneChildCountProjector;

impl Projector for RuneChildCountProjector {
    fn name(&self) -> &str {
        RUNE_CHILD_COUNT
    }

    fn handle(&self, event: &Event, store: &dyn ProjectionStore) -> Result<()> {
        let Some(RuneEvent::Created(data)) = RuneEvent::decode(event)? else {
            return Ok(());
        };
        let Some(parent_id) = data.parent_id else {
            return Ok(());
        };

        let count: i64 = match store.get_as(&event.realm_id, RUNE_CHILD_COUNT, &parent_id) {
            Ok(count) => count,
            Err(err) if err.is_not_found() => 0,
            Err(err) => return Err(err),
        };
        store.put_as(&event.realm_id, RUNE_CHILD_COUNT, &parent_id, &(count + 1))
    }
}
