//! State merger: the single writer of an automation's read snapshot.
//!
//! Patches from every fetcher task arrive on one channel and are applied in
//! arrival order. A settled snapshot is only sent once no patch is
//! immediately pending, and the send itself yields to new patches: the
//! consumer only ever needs the latest state, so intermediate snapshots may
//! be skipped but never delivered out of order.

use buildhub_domain::error::HubError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::patch::Patch;

/// Apply `patches` to `state`, sending a clone to `out` after each settled
/// batch.
///
/// Returns `Ok(())` once every patch sender is gone and the final state has
/// been delivered, or when the consumer is gone.
///
/// # Errors
///
/// Returns [`HubError::Cancelled`] when `cancel` fires.
pub async fn process_patches<S>(
    cancel: CancellationToken,
    mut state: S,
    mut patches: mpsc::Receiver<Patch<S>>,
    out: mpsc::Sender<S>,
) -> Result<(), HubError>
where
    S: Clone + Send,
{
    loop {
        let first = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(HubError::Cancelled),
            patch = patches.recv() => patch,
        };
        let Some(first) = first else {
            return Ok(());
        };
        first.apply(&mut state);

        loop {
            while let Ok(patch) = patches.try_recv() {
                patch.apply(&mut state);
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(HubError::Cancelled),
                patch = patches.recv() => match patch {
                    Some(patch) => patch.apply(&mut state),
                    None => return flush(&cancel, state, &out).await,
                },
                permit = out.reserve() => {
                    let Ok(permit) = permit else {
                        tracing::debug!("state consumer gone, stopping merger");
                        return Ok(());
                    };
                    permit.send(state.clone());
                    break;
                }
            }
        }
    }
}

/// Deliver the last state once no more patches can arrive.
async fn flush<S>(
    cancel: &CancellationToken,
    state: S,
    out: &mpsc::Sender<S>,
) -> Result<(), HubError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(HubError::Cancelled),
        _ = out.send(state) => Ok(()),
    }
}
