use crate::graceful::Graceful;

/// Spawns the component's blocking `start` on a fresh task and waits until
/// the started transition fired.
///
/// Start errors surface through the spawned task, so tests probing start
/// failures call `start` inline instead.
pub async fn spawn_started<G>(component: &G)
where
    G: Graceful + Clone + Send + Sync + 'static,
{
    let mut started = component.notify_started();

    tokio::spawn({
        let component = component.clone();
        async move { component.start().await }
    });

    started.wait().await;
}
