mod common;

use anyhow::Result;
use std::time::Duration;
use tokio::sync::mpsc;

use common::{expect_event, expect_none, peer, Lan};
use lanchat::network::{
    ChatNode, CoordinatorError, NetworkEvent, SessionError, SessionRole, SessionState,
};

fn opened(event: &NetworkEvent) -> bool {
    matches!(event, NetworkEvent::SessionOpened { .. })
}

fn received(event: &NetworkEvent) -> bool {
    matches!(event, NetworkEvent::MessageReceived { .. })
}

async fn next_text(events: &mut mpsc::Receiver<NetworkEvent>) -> Result<String> {
    match expect_event(events, received).await? {
        NetworkEvent::MessageReceived { message, .. } => Ok(message.payload),
        other => anyhow::bail!("unexpected {:?}", other),
    }
}

/// Bob opens a chat with Alice and both ends report it open
async fn connected_pair(
    lan: &Lan,
) -> Result<(
    (ChatNode, mpsc::Receiver<NetworkEvent>),
    (ChatNode, mpsc::Receiver<NetworkEvent>),
)> {
    let (alice, mut alice_events) = lan.node("alice").await?;
    let (bob, mut bob_events) = lan.node("bob").await?;

    bob.request_chat(peer("alice")).await?;

    expect_event(&mut alice_events, opened).await?;
    expect_event(&mut bob_events, opened).await?;

    Ok(((alice, alice_events), (bob, bob_events)))
}

#[tokio::test]
async fn chat_request_connects_both_ends() -> Result<()> {
    let lan = Lan::start().await?;
    let (alice, mut alice_events) = lan.node("alice").await?;
    let (bob, mut bob_events) = lan.node("bob").await?;

    let port = bob.request_chat(peer("alice")).await?;

    let invite = expect_event(&mut alice_events, |e| {
        matches!(e, NetworkEvent::ChatClientRequested { .. })
    })
    .await?;
    match invite {
        NetworkEvent::ChatClientRequested { peer: from, port: invited, .. } => {
            assert_eq!(from, peer("bob"));
            assert_eq!(invited, port);
        }
        other => anyhow::bail!("unexpected {:?}", other),
    }

    match expect_event(&mut alice_events, opened).await? {
        NetworkEvent::SessionOpened { peer: with, role, .. } => {
            assert_eq!(with, peer("bob"));
            assert_eq!(role, SessionRole::Client);
        }
        other => anyhow::bail!("unexpected {:?}", other),
    }
    match expect_event(&mut bob_events, opened).await? {
        NetworkEvent::SessionOpened { peer: with, role, .. } => {
            assert_eq!(with, peer("alice"));
            assert_eq!(role, SessionRole::Server);
        }
        other => anyhow::bail!("unexpected {:?}", other),
    }

    // Bob never receives his own invite
    expect_none(&mut bob_events, Duration::from_millis(200), |e| {
        matches!(e, NetworkEvent::ChatClientRequested { .. })
    })
    .await?;

    let sessions = alice.sessions().await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].state(), SessionState::Connected);

    alice.shutdown().await;
    bob.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn invites_for_other_users_are_ignored() -> Result<()> {
    let lan = Lan::start().await?;
    let (carol, mut carol_events) = lan.node("carol").await?;
    let ((alice, _alice_events), (bob, _bob_events)) = connected_pair(&lan).await?;

    expect_none(&mut carol_events, Duration::from_millis(300), |e| {
        matches!(
            e,
            NetworkEvent::ChatClientRequested { .. } | NetworkEvent::SessionOpened { .. }
        )
    })
    .await?;
    assert!(carol.sessions().await.is_empty());

    alice.shutdown().await;
    bob.shutdown().await;
    carol.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn messages_arrive_once_and_in_order() -> Result<()> {
    let lan = Lan::start().await?;
    let ((alice, mut alice_events), (bob, mut bob_events)) = connected_pair(&lan).await?;

    alice.send_chat_message(&peer("bob"), "hello").await?;
    assert_eq!(next_text(&mut bob_events).await?, "hello");
    expect_none(&mut bob_events, Duration::from_millis(200), received).await?;

    bob.send_chat_message(&peer("alice"), "first").await?;
    bob.send_chat_message(&peer("alice"), "second").await?;
    assert_eq!(next_text(&mut alice_events).await?, "first");
    assert_eq!(next_text(&mut alice_events).await?, "second");

    alice.shutdown().await;
    bob.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn remote_server_request_connects_both_ends() -> Result<()> {
    let lan = Lan::start().await?;
    let (alice, mut alice_events) = lan.node("alice").await?;
    let (bob, mut bob_events) = lan.node("bob").await?;

    alice.request_remote_server(peer("bob")).await?;

    match expect_event(&mut bob_events, opened).await? {
        NetworkEvent::SessionOpened { peer: with, role, .. } => {
            assert_eq!(with, peer("alice"));
            assert_eq!(role, SessionRole::Server);
        }
        other => anyhow::bail!("unexpected {:?}", other),
    }
    match expect_event(&mut alice_events, opened).await? {
        NetworkEvent::SessionOpened { role, .. } => assert_eq!(role, SessionRole::Client),
        other => anyhow::bail!("unexpected {:?}", other),
    }

    bob.send_chat_message(&peer("alice"), "you rang?").await?;
    assert_eq!(next_text(&mut alice_events).await?, "you rang?");

    alice.shutdown().await;
    bob.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn ending_a_chat_closes_the_other_end() -> Result<()> {
    let lan = Lan::start().await?;
    let ((alice, _alice_events), (bob, mut bob_events)) = connected_pair(&lan).await?;

    alice.end_chat(&peer("bob")).await?;

    match expect_event(&mut bob_events, |e| {
        matches!(e, NetworkEvent::SessionClosed { .. })
    })
    .await?
    {
        NetworkEvent::SessionClosed { peer: with, .. } => assert_eq!(with, peer("alice")),
        other => anyhow::bail!("unexpected {:?}", other),
    }
    expect_none(&mut bob_events, Duration::from_millis(200), |e| {
        matches!(e, NetworkEvent::SessionClosed { .. })
    })
    .await?;

    assert!(matches!(
        bob.send_chat_message(&peer("alice"), "still there?").await,
        Err(CoordinatorError::NoSession(_))
    ));
    assert!(matches!(
        alice.send_chat_message(&peer("bob"), "bye").await,
        Err(CoordinatorError::NoSession(_))
    ));
    assert!(bob.sessions().await.is_empty());

    // The pair can chat again afterwards
    bob.request_chat(peer("alice")).await?;
    expect_event(&mut bob_events, opened).await?;

    alice.shutdown().await;
    bob.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn unanswered_server_cannot_send() -> Result<()> {
    let lan = Lan::start().await?;
    let (bob, _bob_events) = lan.node("bob").await?;

    bob.request_chat(peer("nobody")).await?;
    assert!(matches!(
        bob.send_chat_message(&peer("nobody"), "anyone?").await,
        Err(CoordinatorError::SessionError(SessionError::NotConnected))
    ));

    bob.shutdown().await;
    Ok(())
}
