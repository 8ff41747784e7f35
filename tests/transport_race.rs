use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Barrier;

use mdoc_proximity::transport::{
    race_for_connection, AdvertisedTransports, ConnectionState, Error, Role, Transport,
    TransportOptions,
};

mod common;

use common::{ble, MockFactory, MockTransport};

fn as_dyn(mocks: &[Arc<MockTransport>]) -> Vec<Arc<dyn Transport>> {
    mocks
        .iter()
        .map(|m| m.clone() as Arc<dyn Transport>)
        .collect()
}

#[tokio::test]
async fn late_connection_wins_and_the_rest_close() {
    let mocks = vec![
        MockTransport::new(ble(1)),
        MockTransport::new(ble(2)),
        MockTransport::new(ble(3)),
    ];
    let winner = mocks[1].clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        winner.set(ConnectionState::Connecting);
    });

    let transport = race_for_connection(as_dyn(&mocks)).await.unwrap();
    assert_eq!(transport.connection_method(), &ble(2));
    assert_eq!(mocks[0].close_count(), 1);
    assert_eq!(mocks[1].close_count(), 0);
    assert_eq!(mocks[2].close_count(), 1);
}

#[tokio::test]
async fn failures_before_the_winner_do_not_end_the_race() {
    let mocks = vec![MockTransport::new(ble(1)), MockTransport::new(ble(2))];
    mocks[0].set(ConnectionState::Failed);
    let winner = mocks[1].clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        winner.set(ConnectionState::Connected);
    });

    let transport = race_for_connection(as_dyn(&mocks)).await.unwrap();
    assert_eq!(transport.connection_method(), &ble(2));
    assert_eq!(mocks[0].close_count(), 1);
    assert_eq!(mocks[1].close_count(), 0);
}

#[tokio::test]
async fn nobody_connects() {
    let mocks = vec![MockTransport::new(ble(1)), MockTransport::new(ble(2))];
    mocks[0].set(ConnectionState::Failed);
    mocks[1].set(ConnectionState::Closed);

    assert!(matches!(
        race_for_connection(as_dyn(&mocks)).await,
        Err(Error::NoConnection)
    ));
    assert!(mocks.iter().all(|m| m.close_count() == 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_connections_have_one_winner() {
    let mocks = vec![
        MockTransport::new(ble(1)),
        MockTransport::new(ble(2)),
        MockTransport::new(ble(3)),
    ];
    let race = tokio::spawn(race_for_connection(as_dyn(&mocks)));

    let barrier = Arc::new(Barrier::new(mocks.len()));
    let connecting: Vec<_> = mocks
        .iter()
        .map(|mock| {
            let mock = mock.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                mock.set(ConnectionState::Connecting);
            })
        })
        .collect();
    for task in connecting {
        task.await.unwrap();
    }

    let transport = race.await.unwrap().unwrap();
    let winners: Vec<_> = mocks
        .iter()
        .filter(|m| m.connection_method() == transport.connection_method())
        .collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].close_count(), 0);

    let mut closes: Vec<_> = mocks.iter().map(|m| m.close_count()).collect();
    closes.sort();
    assert_eq!(closes, [0, 1, 1]);
}

#[tokio::test]
async fn dropped_race_closes_every_transport() {
    let mocks = vec![MockTransport::new(ble(1)), MockTransport::new(ble(2))];
    let result =
        tokio::time::timeout(Duration::from_millis(20), race_for_connection(as_dyn(&mocks)))
            .await;
    assert!(result.is_err());
    assert_eq!(
        mocks.iter().map(|m| m.close_count()).collect::<Vec<_>>(),
        [1, 1]
    );
}

#[tokio::test]
async fn advertised_transports_close_once() {
    let factory = MockFactory::default();
    let advertised = AdvertisedTransports::advertise(
        &factory,
        &[ble(1), ble(2), ble(3)],
        Role::MdocReader,
        &TransportOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(advertised.len(), 3);
    assert_eq!(advertised.connection_methods(), vec![ble(1), ble(2), ble(3)]);

    let claimed = advertised.claim(&ble(3)).unwrap();
    assert_eq!(claimed.connection_method(), &ble(3));

    let created = factory.created();
    assert_eq!(created[0].close_count(), 1);
    assert_eq!(created[1].close_count(), 1);
    assert_eq!(created[2].close_count(), 0);
    assert_eq!(
        *created[2].state().borrow(),
        ConnectionState::Advertising
    );
}

#[tokio::test]
async fn unclaimed_method_closes_everything() {
    let factory = MockFactory::default();
    let advertised = AdvertisedTransports::advertise(
        &factory,
        &[ble(1), ble(2)],
        Role::MdocReader,
        &TransportOptions::default(),
    )
    .await
    .unwrap();
    assert!(advertised.claim(&ble(5)).is_none());
    assert!(factory.created().iter().all(|t| t.close_count() == 1));
}

#[tokio::test]
async fn race_over_advertised_transports() {
    let factory = MockFactory::default();
    let advertised = AdvertisedTransports::advertise(
        &factory,
        &[ble(1), ble(2)],
        Role::MdocReader,
        &TransportOptions::default(),
    )
    .await
    .unwrap();
    let created = factory.created();
    created[0].set(ConnectionState::Connected);

    let transport = race_for_connection(advertised.into_inner()).await.unwrap();
    assert_eq!(transport.connection_method(), &ble(1));
    assert_eq!(created[0].close_count(), 0);
    assert_eq!(created[1].close_count(), 1);
}
