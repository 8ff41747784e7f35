use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info};

use super::{AdvertisedTransports, ConnectionState, Error, Transport};

/// Wait for the first transport the other side reaches and close the rest.
///
/// Every transport is watched concurrently. The first one to report
/// [ConnectionState::Connecting] or [ConnectionState::Connected] becomes the
/// winner; every other transport is closed exactly once. If all of them fail or
/// close, they are all closed and [Error::NoConnection] is returned. Dropping
/// the future before it resolves closes every transport.
pub async fn race_for_connection(
    transports: Vec<Arc<dyn Transport>>,
) -> Result<Arc<dyn Transport>, Error> {
    // Only the winner ever leaves this; the rest close when it drops.
    let mut racing = AdvertisedTransports::from(transports);
    let winner: Arc<Mutex<Option<usize>>> = Arc::new(Mutex::new(None));
    let mut watchers = JoinSet::new();

    for (index, transport) in racing.transports.iter().enumerate() {
        let mut state = transport.state();
        let winner = winner.clone();
        watchers.spawn(async move {
            let reached = state
                .wait_for(|s| s.is_connecting_or_connected() || s.is_terminal())
                .await
                .map(|s| *s)
                .unwrap_or(ConnectionState::Closed);
            if !reached.is_connecting_or_connected() {
                debug!("transport {index} dropped out of the race: {reached}");
                return false;
            }
            let mut winner = winner.lock().await;
            if winner.is_some() {
                return false;
            }
            *winner = Some(index);
            true
        });
    }

    while let Some(joined) = watchers.join_next().await {
        match joined {
            Ok(true) => break,
            Ok(false) => continue,
            Err(e) => {
                watchers.abort_all();
                return Err(Error::Task(e));
            }
        }
    }
    watchers.abort_all();

    let index = (*winner.lock().await).ok_or(Error::NoConnection)?;
    let transport = racing.transports.swap_remove(index);
    drop(racing);
    info!(
        "connected over {:?}",
        transport.connection_method().method_type()
    );
    Ok(transport)
}
