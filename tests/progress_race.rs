mod common;

use std::sync::Arc;

use manoir_back::{
    dao::game_store::GameStore,
    dto::progress::SubmitAnswerResponse,
    services::{
        credentials::Credential,
        progress_service::{self, AnswerOutcome},
        session_service,
    },
    state::{SharedState, lifecycle::GameStatus},
};
use uuid::Uuid;

use common::{count_events, create, credential, drain, join, listen, memory_state};

async fn running_pair(state: &SharedState) -> (Uuid, Credential, Credential) {
    let host = create(state, "alice").await;
    let guest = join(state, &host.code, "bob").await;
    let alice = credential(state, &host);
    let bob = credential(state, &guest);
    session_service::start_game(state, &alice).await.unwrap();
    (host.game_id, alice, bob)
}

async fn running_squad(state: &SharedState) -> (Uuid, Vec<Credential>) {
    let host = create(state, "alice").await;
    let mut credentials = vec![credential(state, &host)];
    for nickname in ["bob", "carol", "dan"] {
        let guest = join(state, &host.code, nickname).await;
        credentials.push(credential(state, &guest));
    }
    session_service::start_game(state, &credentials[0]).await.unwrap();
    (host.game_id, credentials)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_correct_answers_credit_exactly_one_player() {
    for _ in 0..25 {
        let (state, store) = memory_state().await;
        let (game_id, players) = running_squad(&state).await;
        let mut room = listen(&state, game_id);

        let handles: Vec<_> = players
            .iter()
            .cloned()
            .map(|credential| {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    progress_service::submit_answer(&state, &credential, "p1", "ok")
                        .await
                        .unwrap()
                })
            })
            .collect();
        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }

        let credited = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, AnswerOutcome::Credited { .. }))
            .count();
        let duplicates = outcomes
            .iter()
            .filter(|outcome| **outcome == AnswerOutcome::DuplicateCredit)
            .count();
        assert_eq!((credited, duplicates), (1, 3));

        let completion = store
            .find_completion(game_id, "p1".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.list_completions(game_id).await.unwrap().len(), 1);

        for credential in &players {
            let won = credential.player_id == completion.completed_by;
            let progress = store
                .find_player_progress(credential.player_id, "p1".into())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(progress.attempts, 1);
            assert!(progress.solved);
            assert_eq!(progress.score_awarded, if won { 100 } else { 0 });

            let player = store.find_player(credential.player_id).await.unwrap().unwrap();
            assert_eq!(player.score_total, if won { 100 } else { 0 });
        }

        let frames = drain(&mut room);
        assert_eq!(count_events(&frames, "puzzle:solved"), 1);

        let game = store.find_game(game_id).await.unwrap().unwrap();
        assert_eq!(game.current_puzzle_index, 1);
    }
}

#[tokio::test]
async fn repeated_correct_answer_awards_points_once() {
    let (state, store) = memory_state().await;
    let (game_id, alice, _) = running_pair(&state).await;
    let mut room = listen(&state, game_id);

    let first = progress_service::submit_answer(&state, &alice, "p1", "OK")
        .await
        .unwrap();
    let second = progress_service::submit_answer(&state, &alice, "p1", "ok")
        .await
        .unwrap();
    assert!(matches!(first, AnswerOutcome::Credited { points: 100, .. }));
    assert_eq!(second, AnswerOutcome::AlreadyCredited);

    let response = SubmitAnswerResponse::from(second);
    assert!(response.ok && response.accepted);
    assert_eq!(response.points_awarded, 0);

    let player = store.find_player(alice.player_id).await.unwrap().unwrap();
    assert_eq!(player.score_total, 100);
    assert_eq!(count_events(&drain(&mut room), "puzzle:solved"), 1);
}

#[tokio::test]
async fn runtime_state_follows_the_ledger() {
    let (state, store) = memory_state().await;
    let (game_id, alice, bob) = running_pair(&state).await;

    progress_service::submit_answer(&state, &bob, "p1", "nope")
        .await
        .unwrap();
    let runtime = store.find_runtime_state(game_id).await.unwrap().unwrap();
    assert_eq!(runtime.current_puzzle_slug, "p1");
    assert_eq!(runtime.attempts, 1);

    progress_service::submit_answer(&state, &alice, "p1", "ok")
        .await
        .unwrap();
    let runtime = store.find_runtime_state(game_id).await.unwrap().unwrap();
    assert_eq!(runtime.current_puzzle_slug, "p2");
    assert_eq!(runtime.attempts, 0);
    assert!(!runtime.solved);
}

#[tokio::test]
async fn dynamic_answers_are_accepted() {
    let (state, _) = memory_state().await;
    let (_, alice, _) = running_pair(&state).await;

    let outcome = progress_service::submit_answer(&state, &alice, "p3", "  musée OUBLIÉ ")
        .await
        .unwrap();
    assert!(matches!(outcome, AnswerOutcome::Credited { .. }));
}

#[tokio::test]
async fn solving_every_puzzle_finishes_the_game_once() {
    let (state, store) = memory_state().await;
    let (game_id, alice, bob) = running_pair(&state).await;
    let mut room = listen(&state, game_id);

    for (credential, slug, answer) in [
        (&alice, "p1", "ok"),
        (&bob, "p2", "second"),
        (&alice, "p3", "third"),
    ] {
        progress_service::submit_answer(&state, credential, slug, answer)
            .await
            .unwrap();
    }

    let game = store.find_game(game_id).await.unwrap().unwrap();
    assert_eq!(game.status, GameStatus::Finished);
    assert_eq!(game.current_puzzle_index, 3);

    let frames = drain(&mut room);
    assert_eq!(count_events(&frames, "puzzle:solved"), 3);
    assert_eq!(count_events(&frames, "game:completed"), 1);
    let (_, completed) = frames
        .iter()
        .find(|(event, _)| event == "game:completed")
        .unwrap();
    assert_eq!(completed["reason"], "puzzles_completed");
    assert_eq!(
        completed["completedIds"],
        serde_json::json!(["p1", "p2", "p3"])
    );

    let completed = progress_service::get_completed_puzzles(&state, &bob, game_id)
        .await
        .unwrap();
    assert_eq!(completed.completed_ids, ["p1", "p2", "p3"]);
}
