//! The combined iterator: a state machine composing the snapshot,
//! change-stream and polling iterators behind a single interface.

use crate::error::{Error, Result};
use crate::record::Record;
use crate::source::cdc::{is_pipeline_required_error, Cdc};
use crate::source::polling::Polling;
use crate::source::position::Position;
use crate::source::snapshot::Snapshot;
use bson::Document;
use mongodb::Collection;

// The three mutually exclusive operational states. Holding the active
// sub-iterators inside the variant keeps "which iterator is running" a fact
// of the type rather than something re-derived from nullable fields.
enum IteratorState {
    /// Snapshot running; the change stream is already open and idle so its
    /// resume token pins the snapshot's logical start time.
    Snapshot { snapshot: Snapshot, cdc: Cdc },
    /// Steady-state change stream tailing.
    Cdc { cdc: Cdc },
    /// Insert-only polling on servers without change stream support.
    Polling { polling: Polling },
}

/// Incoming parameters for [`Combined::new`].
pub struct CombinedParams {
    pub collection: Collection<Document>,
    pub batch_size: u32,
    pub snapshot: bool,
    pub ordering_field: String,
    pub position: Option<Position>,
}

/// A combined iterator for one MongoDB collection.
///
/// Construction always attempts to open a change stream first, positioned
/// at the persisted resume token when one exists and at the current server
/// time otherwise, so a resume token is captured at the earliest possible
/// moment. A snapshot, when requested, is bounded before that token's
/// logical time, which makes the handoff from snapshot to CDC gap-free.
pub struct Combined {
    // `None` only transiently during a state switch; observing it from
    // has_next/next is an invariant violation surfaced as `NoIterator`.
    state: Option<IteratorState>,
}

impl Combined {
    pub async fn new(params: CombinedParams) -> Result<Self> {
        let CombinedParams {
            collection,
            batch_size,
            snapshot,
            ordering_field,
            position,
        } = params;

        let resume_token = position
            .as_ref()
            .map(Position::resume_token)
            .filter(|token| !token.is_empty());

        let cdc = match Cdc::new(&collection, resume_token).await {
            Ok(cdc) => cdc,
            Err(err) if is_pipeline_required_error(&err) => {
                tracing::info!(
                    "server does not support change streams, falling back to insert-only polling"
                );
                let polling = Polling::new(collection, ordering_field, batch_size);

                return Ok(Self {
                    state: Some(IteratorState::Polling { polling }),
                });
            }
            Err(err) => return Err(err),
        };

        if should_snapshot(snapshot, position.as_ref()) {
            let (element, max_element) = match position {
                Some(Position::Snapshot {
                    element,
                    max_element,
                    ..
                }) => (element, max_element),
                _ => (None, None),
            };

            let resume_token = cdc.resume_token_bytes()?;
            match Snapshot::new(
                collection,
                ordering_field,
                batch_size,
                element,
                max_element,
                resume_token,
            )
            .await?
            {
                Some(snapshot) => {
                    return Ok(Self {
                        state: Some(IteratorState::Snapshot { snapshot, cdc }),
                    });
                }
                None => {
                    tracing::info!("collection has no documents, skipping snapshot");
                }
            }
        }

        Ok(Self {
            state: Some(IteratorState::Cdc { cdc }),
        })
    }

    /// Whether a record is available. When the snapshot drains, this is
    /// where the iterator hands off to the already-open change stream.
    pub async fn has_next(&mut self) -> Result<bool> {
        let mut snapshot_drained = false;
        if let Some(IteratorState::Snapshot { snapshot, .. }) = self.state.as_mut() {
            if snapshot.has_next().await? {
                return Ok(true);
            }
            snapshot_drained = true;
        }

        if snapshot_drained {
            tracing::info!("snapshot completed, switching to change stream tailing");
            self.switch_to_cdc().await?;
        }

        match self.state.as_mut() {
            Some(IteratorState::Cdc { cdc }) => cdc.has_next().await,
            Some(IteratorState::Polling { polling }) => polling.has_next().await,
            Some(IteratorState::Snapshot { .. }) | None => Err(Error::NoIterator),
        }
    }

    /// Return the next record. Must be preceded by a `has_next` that
    /// returned `true`.
    pub async fn next(&mut self) -> Result<Record> {
        match self.state.as_mut() {
            Some(IteratorState::Snapshot { snapshot, .. }) => snapshot.next(),
            Some(IteratorState::Cdc { cdc }) => cdc.next(),
            Some(IteratorState::Polling { polling }) => polling.next(),
            None => Err(Error::NoIterator),
        }
    }

    /// Stop every sub-iterator: snapshot first, then polling, then the
    /// change stream, attempting all of them and aggregating failures.
    /// Idempotent.
    pub async fn stop(&mut self) -> Result<()> {
        let mut failures: Vec<String> = Vec::new();

        match self.state.take() {
            Some(IteratorState::Snapshot {
                mut snapshot,
                mut cdc,
            }) => {
                if let Err(e) = snapshot.stop().await {
                    failures.push(format!("stop snapshot: {e}"));
                }
                if let Err(e) = cdc.stop().await {
                    failures.push(format!("stop change stream: {e}"));
                }
            }
            Some(IteratorState::Cdc { mut cdc }) => {
                if let Err(e) = cdc.stop().await {
                    failures.push(format!("stop change stream: {e}"));
                }
            }
            Some(IteratorState::Polling { mut polling }) => {
                if let Err(e) = polling.stop().await {
                    failures.push(format!("stop polling: {e}"));
                }
            }
            None => {}
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Stop(failures.join("; ")))
        }
    }

    // Install the already-open change stream as the active iterator, then
    // release the snapshot cursor.
    async fn switch_to_cdc(&mut self) -> Result<()> {
        match self.state.take() {
            Some(IteratorState::Snapshot { mut snapshot, cdc }) => {
                self.state = Some(IteratorState::Cdc { cdc });
                snapshot.stop().await?;

                Ok(())
            }
            state => {
                self.state = state;

                Err(Error::NoIterator)
            }
        }
    }
}

// A snapshot runs on a fresh start and when resuming a position that was
// emitted mid-snapshot. A `cdc`-mode position, or the flag being off,
// goes straight to tailing.
fn should_snapshot(snapshot: bool, position: Option<&Position>) -> bool {
    snapshot && matches!(position, None | Some(Position::Snapshot { .. }))
}
