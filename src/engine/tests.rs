use super::*;
use crate::limits::*;
use crate::mail::{EmailMessage, MailError, Mailer};
use chrono::FixedOffset;
use std::time::Duration;

const H: Ms = 3_600_000; // 1 hour in ms
const M: Ms = 60_000; // 1 minute in ms
/// 2024-03-01T00:00:00Z
const DAY: Ms = 1_709_251_200_000;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("esp_reservation_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn student(name: &str) -> Actor {
    Actor::new(
        Ulid::new(),
        Role::Student,
        name,
        format!("{}@esp.sn", name.to_lowercase()),
    )
}

fn request(location_id: Ulid, title: &str, start: Ms, end: Ms) -> NewReservation {
    NewReservation {
        location_id,
        title: title.into(),
        description: None,
        start,
        end,
    }
}

struct Fixture {
    engine: Engine,
    location: Ulid,
    commission: Ulid,
    cee: Actor,
}

/// One commission with one CEE member, owning one location capped at `max_hours`.
async fn fixture_with(name: &str, max_hours: Option<u32>, outbox: Outbox) -> Fixture {
    let engine = Engine::new(test_wal_path(name), Arc::new(NotifyHub::new()), outbox).unwrap();
    let commission = Ulid::new();
    let location = Ulid::new();
    let cee = Actor::new(Ulid::new(), Role::Cee, "Moussa", "moussa@esp.sn");
    engine
        .create_commission(commission, "Commission Culture", None)
        .await
        .unwrap();
    engine
        .add_commission_member(commission, cee.user_id, cee.contact.clone())
        .await
        .unwrap();
    engine
        .create_location(location, commission, "Amphi A", None, max_hours)
        .await
        .unwrap();
    Fixture {
        engine,
        location,
        commission,
        cee,
    }
}

async fn fixture(name: &str) -> Fixture {
    fixture_with(name, None, Outbox::disabled()).await
}

// ── Catalog ──────────────────────────────────────────────

#[tokio::test]
async fn catalog_create_and_list() {
    let f = fixture("catalog.wal").await;
    let commissions = f.engine.list_commissions();
    assert_eq!(commissions.len(), 1);
    assert_eq!(commissions[0].color, DEFAULT_COMMISSION_COLOR);
    assert!(commissions[0].is_member(&f.cee.user_id));

    let locations = f.engine.list_locations().await;
    assert_eq!(locations.len(), 1);
    assert_eq!(locations[0].commission_id, f.commission);
    assert_eq!(f.engine.get_location(f.location).await.unwrap().name, "Amphi A");
}

#[tokio::test]
async fn location_needs_existing_commission() {
    let f = fixture("location_needs_commission.wal").await;
    let result = f
        .engine
        .create_location(Ulid::new(), Ulid::new(), "Gymnase", None, None)
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn duplicate_ids_rejected() {
    let f = fixture("duplicates.wal").await;
    let result = f.engine.create_commission(f.commission, "Autre", None).await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
    let result = f
        .engine
        .create_location(f.location, f.commission, "Salle 2", None, None)
        .await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
    let result = f
        .engine
        .add_commission_member(f.commission, f.cee.user_id, f.cee.contact.clone())
        .await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn invalid_catalog_input() {
    let f = fixture("invalid_catalog.wal").await;
    assert!(matches!(
        f.engine.create_commission(Ulid::new(), "ab", None).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        f.engine
            .create_commission(Ulid::new(), "Sport", Some("blue"))
            .await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        f.engine
            .create_location(Ulid::new(), f.commission, "Terrain", None, Some(0))
            .await,
        Err(EngineError::Validation(_))
    ));
}

// ── Creating reservations ────────────────────────────────

#[tokio::test]
async fn student_creates_pending_reservation() {
    let f = fixture("create_pending.wal").await;
    let awa = student("Awa");
    let r = f
        .engine
        .create_reservation(&awa, request(f.location, "  Soirée culturelle ", DAY + 10 * H, DAY + 12 * H))
        .await
        .unwrap();
    assert_eq!(r.status, ReservationStatus::Pending);
    assert_eq!(r.title, "Soirée culturelle");
    assert_eq!(r.user_id, awa.user_id);
    assert_eq!(r.requester, awa.contact);
    assert_eq!(r.created_at, r.updated_at);
    assert_eq!(f.engine.get_reservation(r.id).await, Some(r));
}

#[tokio::test]
async fn only_students_create_reservations() {
    let f = fixture("only_students.wal").await;
    let admin = Actor::new(Ulid::new(), Role::Admin, "Admin", "admin@esp.sn");
    for actor in [&f.cee, &admin] {
        let result = f
            .engine
            .create_reservation(actor, request(f.location, "Réunion CEE", DAY, DAY + H))
            .await;
        assert!(matches!(result, Err(EngineError::Unauthorized)));
    }
}

#[tokio::test]
async fn unknown_location_is_not_found() {
    let f = fixture("unknown_location.wal").await;
    let result = f
        .engine
        .create_reservation(&student("Awa"), request(Ulid::new(), "Répétition", DAY, DAY + H))
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn overlapping_request_conflicts() {
    let f = fixture("overlap_conflict.wal").await;
    let first = f
        .engine
        .create_reservation(&student("Awa"), request(f.location, "Conférence", DAY + 10 * H, DAY + 12 * H))
        .await
        .unwrap();
    f.engine.accept_reservation(&f.cee, first.id).await.unwrap();

    let result = f
        .engine
        .create_reservation(&student("Ibou"), request(f.location, "Tournoi", DAY + 11 * H, DAY + 13 * H))
        .await;
    match result {
        Err(EngineError::Conflict(with)) => assert_eq!(with, first.id),
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn pending_requests_also_hold_the_slot() {
    let f = fixture("pending_holds.wal").await;
    f.engine
        .create_reservation(&student("Awa"), request(f.location, "Conférence", DAY + 10 * H, DAY + 12 * H))
        .await
        .unwrap();
    let result = f
        .engine
        .create_reservation(&student("Ibou"), request(f.location, "Tournoi", DAY + 10 * H, DAY + 12 * H))
        .await;
    assert!(matches!(result, Err(EngineError::Conflict(_))));
}

#[tokio::test]
async fn back_to_back_requests_coexist() {
    let f = fixture("back_to_back.wal").await;
    let awa = student("Awa");
    f.engine
        .create_reservation(&awa, request(f.location, "Matinée", DAY + 10 * H, DAY + 12 * H))
        .await
        .unwrap();
    f.engine
        .create_reservation(&awa, request(f.location, "Après-midi", DAY + 12 * H, DAY + 13 * H))
        .await
        .unwrap();
    assert_eq!(
        f.engine
            .find_reservations(f.location, &[ReservationStatus::Pending])
            .await
            .len(),
        2
    );
}

#[tokio::test]
async fn same_slot_in_other_location_is_free() {
    let f = fixture("other_location.wal").await;
    let other = Ulid::new();
    f.engine
        .create_location(other, f.commission, "Amphi B", None, None)
        .await
        .unwrap();
    let awa = student("Awa");
    f.engine
        .create_reservation(&awa, request(f.location, "Conférence", DAY + 10 * H, DAY + 12 * H))
        .await
        .unwrap();
    f.engine
        .create_reservation(&awa, request(other, "Conférence", DAY + 10 * H, DAY + 12 * H))
        .await
        .unwrap();
}

#[tokio::test]
async fn rejected_and_cancelled_free_the_slot() {
    let f = fixture("freed_slot.wal").await;
    let awa = student("Awa");
    let a = f
        .engine
        .create_reservation(&awa, request(f.location, "Conférence", DAY + 10 * H, DAY + 12 * H))
        .await
        .unwrap();
    f.engine
        .reject_reservation(&f.cee, a.id, "Salle en travaux ce jour-là")
        .await
        .unwrap();
    let b = f
        .engine
        .create_reservation(&awa, request(f.location, "Conférence bis", DAY + 10 * H, DAY + 12 * H))
        .await
        .unwrap();
    f.engine.cancel_reservation(&awa, b.id).await.unwrap();
    f.engine
        .create_reservation(&awa, request(f.location, "Conférence ter", DAY + 10 * H, DAY + 12 * H))
        .await
        .unwrap();
}

#[tokio::test]
async fn duration_cap_enforced() {
    let f = fixture_with("duration_cap.wal", Some(3), Outbox::disabled()).await;
    let awa = student("Awa");
    let err = f
        .engine
        .create_reservation(&awa, request(f.location, "Longue réunion", DAY + 9 * H, DAY + 12 * H + 30 * M))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DurationExceeded { max_hours: 3, .. }));
    assert_eq!(err.to_string(), "maximum duration is 3h (requested 3.5h)");

    f.engine
        .create_reservation(&awa, request(f.location, "Réunion exacte", DAY + 9 * H, DAY + 12 * H))
        .await
        .unwrap();
}

#[tokio::test]
async fn lowered_cap_applies_to_new_requests() {
    let f = fixture("lowered_cap.wal").await;
    let awa = student("Awa");
    f.engine
        .create_reservation(&awa, request(f.location, "Gala annuel", DAY + 8 * H, DAY + 14 * H))
        .await
        .unwrap();
    f.engine
        .update_location(f.location, "Amphi A", Some("Rez-de-chaussée".into()), Some(2))
        .await
        .unwrap();
    let result = f
        .engine
        .create_reservation(&awa, request(f.location, "Atelier", DAY + 15 * H, DAY + 18 * H))
        .await;
    assert!(matches!(result, Err(EngineError::DurationExceeded { .. })));
    let loc = f.engine.get_location(f.location).await.unwrap();
    assert_eq!(loc.max_duration_hours, Some(2));
    assert_eq!(loc.description.as_deref(), Some("Rez-de-chaussée"));
}

#[tokio::test]
async fn malformed_requests_rejected() {
    let f = fixture("malformed.wal").await;
    let awa = student("Awa");
    let cases = [
        request(f.location, "Club", DAY, DAY + H),
        request(f.location, "Répétition", DAY + H, DAY),
        request(f.location, "Répétition", DAY, DAY),
    ];
    for req in cases {
        assert!(matches!(
            f.engine.create_reservation(&awa, req).await,
            Err(EngineError::Validation(_))
        ));
    }
    assert!(matches!(
        f.engine
            .create_reservation(&awa, request(f.location, "Répétition", 1_000, 1_000 + H))
            .await,
        Err(EngineError::LimitExceeded(_))
    ));
}

// ── Lifecycle ────────────────────────────────────────────

#[tokio::test]
async fn member_accepts_and_decision_is_final() {
    let f = fixture("accept_final.wal").await;
    let awa = student("Awa");
    let r = f
        .engine
        .create_reservation(&awa, request(f.location, "Conférence", DAY + 10 * H, DAY + 12 * H))
        .await
        .unwrap();
    let accepted = f.engine.accept_reservation(&f.cee, r.id).await.unwrap();
    assert_eq!(accepted.status, ReservationStatus::Accepted);
    assert!(accepted.updated_at >= accepted.created_at);

    assert!(matches!(
        f.engine
            .reject_reservation(&f.cee, r.id, "Changement de programme")
            .await,
        Err(EngineError::InvalidTransition { .. })
    ));
    assert!(matches!(
        f.engine.cancel_reservation(&awa, r.id).await,
        Err(EngineError::InvalidTransition { .. })
    ));
    assert_eq!(
        f.engine.get_reservation(r.id).await.unwrap().status,
        ReservationStatus::Accepted
    );
}

#[tokio::test]
async fn outsiders_cannot_decide() {
    let f = fixture("outsiders.wal").await;
    let awa = student("Awa");
    let r = f
        .engine
        .create_reservation(&awa, request(f.location, "Conférence", DAY, DAY + H))
        .await
        .unwrap();
    let other_cee = Actor::new(Ulid::new(), Role::Cee, "Fatou", "fatou@esp.sn");
    assert!(matches!(
        f.engine.accept_reservation(&other_cee, r.id).await,
        Err(EngineError::Unauthorized)
    ));
    assert!(matches!(
        f.engine.accept_reservation(&awa, r.id).await,
        Err(EngineError::Unauthorized)
    ));
    let admin = Actor::new(Ulid::new(), Role::Admin, "Admin", "admin@esp.sn");
    f.engine.accept_reservation(&admin, r.id).await.unwrap();
}

#[tokio::test]
async fn removed_member_loses_decision_rights() {
    let f = fixture("removed_member.wal").await;
    let r = f
        .engine
        .create_reservation(&student("Awa"), request(f.location, "Conférence", DAY, DAY + H))
        .await
        .unwrap();
    f.engine
        .remove_commission_member(f.commission, f.cee.user_id)
        .await
        .unwrap();
    assert!(matches!(
        f.engine.accept_reservation(&f.cee, r.id).await,
        Err(EngineError::Unauthorized)
    ));
    assert!(matches!(
        f.engine
            .remove_commission_member(f.commission, f.cee.user_id)
            .await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn rejection_needs_reason() {
    let f = fixture("rejection_reason.wal").await;
    let r = f
        .engine
        .create_reservation(&student("Awa"), request(f.location, "Conférence", DAY, DAY + H))
        .await
        .unwrap();
    assert!(matches!(
        f.engine.reject_reservation(&f.cee, r.id, "   non    ").await,
        Err(EngineError::Validation(_))
    ));
    let rejected = f
        .engine
        .reject_reservation(&f.cee, r.id, "  Salle réservée aux examens  ")
        .await
        .unwrap();
    assert_eq!(rejected.status, ReservationStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("Salle réservée aux examens"));
}

#[tokio::test]
async fn only_owner_cancels() {
    let f = fixture("owner_cancels.wal").await;
    let awa = student("Awa");
    let r = f
        .engine
        .create_reservation(&awa, request(f.location, "Conférence", DAY, DAY + H))
        .await
        .unwrap();
    assert!(matches!(
        f.engine.cancel_reservation(&student("Ibou"), r.id).await,
        Err(EngineError::Unauthorized)
    ));
    assert!(matches!(
        f.engine.cancel_reservation(&f.cee, r.id).await,
        Err(EngineError::Unauthorized)
    ));
    let cancelled = f.engine.cancel_reservation(&awa, r.id).await.unwrap();
    assert_eq!(cancelled.status, ReservationStatus::Cancelled);
}

#[tokio::test]
async fn delete_removes_pending_request() {
    let f = fixture("delete_pending.wal").await;
    let awa = student("Awa");
    let r = f
        .engine
        .create_reservation(&awa, request(f.location, "Conférence", DAY, DAY + H))
        .await
        .unwrap();
    assert!(matches!(
        f.engine.delete_reservation(&student("Ibou"), r.id).await,
        Err(EngineError::Unauthorized)
    ));
    f.engine.delete_reservation(&awa, r.id).await.unwrap();
    assert_eq!(f.engine.get_reservation(r.id).await, None);
    assert!(matches!(
        f.engine.delete_reservation(&awa, r.id).await,
        Err(EngineError::NotFound(_))
    ));

    let kept = f
        .engine
        .create_reservation(&awa, request(f.location, "Conférence", DAY, DAY + H))
        .await
        .unwrap();
    f.engine.accept_reservation(&f.cee, kept.id).await.unwrap();
    assert!(matches!(
        f.engine.delete_reservation(&awa, kept.id).await,
        Err(EngineError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn raw_status_update() {
    let f = fixture("raw_status.wal").await;
    let r = f
        .engine
        .create_reservation(&student("Awa"), request(f.location, "Conférence", DAY, DAY + H))
        .await
        .unwrap();
    assert!(
        f.engine
            .update_reservation_status(r.id, ReservationStatus::Rejected, None)
            .await
            .is_err()
    );
    let updated = f
        .engine
        .update_reservation_status(r.id, ReservationStatus::Rejected, Some("Hors calendrier"))
        .await
        .unwrap();
    assert_eq!(updated.rejection_reason.as_deref(), Some("Hors calendrier"));
    assert!(matches!(
        f.engine
            .update_reservation_status(r.id, ReservationStatus::Accepted, None)
            .await,
        Err(EngineError::InvalidTransition { .. })
    ));
    assert!(matches!(
        f.engine
            .update_reservation_status(Ulid::new(), ReservationStatus::Accepted, None)
            .await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Queries ──────────────────────────────────────────────

#[tokio::test]
async fn user_reservations_filter_search_and_page() {
    let f = fixture("user_queries.wal").await;
    let awa = student("Awa");
    let ibou = student("Ibou");
    let mut ids = Vec::new();
    for i in 0..12 {
        let mut req = request(
            f.location,
            &format!("Répétition {i:02}"),
            DAY + i * 2 * H,
            DAY + i * 2 * H + H,
        );
        if i == 3 {
            req.description = Some("Préparation du GALA".into());
        }
        ids.push(f.engine.create_reservation(&awa, req).await.unwrap().id);
        // Distinct creation timestamps for a stable newest-first order.
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    f.engine
        .create_reservation(&ibou, request(f.location, "Tournoi", DAY + 30 * H, DAY + 31 * H))
        .await
        .unwrap();
    f.engine.accept_reservation(&f.cee, ids[0]).await.unwrap();

    let page = f
        .engine
        .user_reservations(awa.user_id, &ReservationFilter::default())
        .await;
    assert_eq!(page.total, 12);
    assert_eq!(page.limit, DEFAULT_PAGE_SIZE);
    assert_eq!(page.total_pages, 2);
    assert_eq!(page.items[0].id, ids[11]);

    let second = f
        .engine
        .user_reservations(
            awa.user_id,
            &ReservationFilter {
                page: 2,
                ..Default::default()
            },
        )
        .await;
    assert_eq!(second.items.len(), 2);
    assert_eq!(second.items[1].id, ids[0]);

    let accepted = f
        .engine
        .user_reservations(
            awa.user_id,
            &ReservationFilter {
                status: Some(ReservationStatus::Accepted),
                ..Default::default()
            },
        )
        .await;
    assert_eq!(accepted.total, 1);

    let searched = f
        .engine
        .user_reservations(
            awa.user_id,
            &ReservationFilter {
                search: Some(" gala ".into()),
                ..Default::default()
            },
        )
        .await;
    assert_eq!(searched.total, 1);
    assert_eq!(searched.items[0].id, ids[3]);
}

#[tokio::test]
async fn calendar_shows_only_accepted_in_order() {
    let f = fixture("calendar_accepted.wal").await;
    let awa = student("Awa");
    let late = f
        .engine
        .create_reservation(&awa, request(f.location, "Soirée", DAY + 20 * H, DAY + 22 * H))
        .await
        .unwrap();
    let early = f
        .engine
        .create_reservation(&awa, request(f.location, "Matinée", DAY + 8 * H, DAY + 9 * H))
        .await
        .unwrap();
    f.engine
        .create_reservation(&awa, request(f.location, "Midi", DAY + 12 * H, DAY + 13 * H))
        .await
        .unwrap();
    f.engine.accept_reservation(&f.cee, late.id).await.unwrap();
    f.engine.accept_reservation(&f.cee, early.id).await.unwrap();

    let shown: Vec<Ulid> = f
        .engine
        .calendar_reservations(Some(f.location))
        .await
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(shown, vec![early.id, late.id]);
    assert_eq!(f.engine.calendar_reservations(None).await.len(), 2);
    assert!(f.engine.calendar_reservations(Some(Ulid::new())).await.is_empty());
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn wal_replay_restores_state() {
    let path = test_wal_path("replay.wal");
    let awa = student("Awa");
    let cee = Actor::new(Ulid::new(), Role::Cee, "Moussa", "moussa@esp.sn");
    let commission = Ulid::new();
    let location = Ulid::new();
    let (accepted, deleted) = {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new()), Outbox::disabled()).unwrap();
        engine.create_commission(commission, "Sport", Some("#10b981")).await.unwrap();
        engine
            .add_commission_member(commission, cee.user_id, cee.contact.clone())
            .await
            .unwrap();
        engine
            .create_location(location, commission, "Gymnase", None, Some(4))
            .await
            .unwrap();
        let a = engine
            .create_reservation(&awa, request(location, "Tournoi de basket", DAY + 9 * H, DAY + 12 * H))
            .await
            .unwrap();
        let d = engine
            .create_reservation(&awa, request(location, "Entraînement", DAY + 14 * H, DAY + 15 * H))
            .await
            .unwrap();
        engine.accept_reservation(&cee, a.id).await.unwrap();
        engine.delete_reservation(&awa, d.id).await.unwrap();
        (engine.get_reservation(a.id).await.unwrap(), d.id)
    };

    let engine = Engine::new(path, Arc::new(NotifyHub::new()), Outbox::disabled()).unwrap();
    assert_eq!(engine.get_reservation(accepted.id).await, Some(accepted.clone()));
    assert_eq!(engine.get_reservation(deleted).await, None);
    let c = engine.get_commission(commission).unwrap();
    assert_eq!(c.color, "#10b981");
    assert!(c.is_member(&cee.user_id));
    assert_eq!(
        engine.get_location(location).await.unwrap().max_duration_hours,
        Some(4)
    );
    // Replayed state keeps enforcing conflicts.
    let result = engine
        .create_reservation(&awa, request(location, "Match amical", DAY + 10 * H, DAY + 11 * H))
        .await;
    assert!(matches!(result, Err(EngineError::Conflict(_))));
}

#[tokio::test]
async fn writes_after_torn_tail_survive_restart() {
    let path = test_wal_path("torn_tail_restart.wal");
    let first = Ulid::new();
    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new()), Outbox::disabled()).unwrap();
        engine.create_commission(first, "Culture", None).await.unwrap();
    }
    {
        use std::io::Write;
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&[40u8, 0, 0, 0, 1, 2, 3]).unwrap();
    }

    let second = Ulid::new();
    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new()), Outbox::disabled()).unwrap();
        assert!(engine.get_commission(first).is_some());
        engine.create_commission(second, "Sport", None).await.unwrap();
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new()), Outbox::disabled()).unwrap();
    assert_eq!(engine.list_commissions().len(), 2);
    assert!(engine.get_commission(second).is_some());
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compaction.wal");
    let awa = student("Awa");
    let (kept, decided, location) = {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new()), Outbox::disabled()).unwrap();
        let commission = Ulid::new();
        let location = Ulid::new();
        let cee = Actor::new(Ulid::new(), Role::Cee, "Moussa", "moussa@esp.sn");
        engine.create_commission(commission, "Culture", None).await.unwrap();
        engine
            .add_commission_member(commission, cee.user_id, cee.contact.clone())
            .await
            .unwrap();
        engine
            .create_location(location, commission, "Salle 12", None, None)
            .await
            .unwrap();
        for i in 0..10 {
            let r = engine
                .create_reservation(&awa, request(location, "Brouillon", DAY + i * H, DAY + i * H + H))
                .await
                .unwrap();
            engine.delete_reservation(&awa, r.id).await.unwrap();
        }
        let kept = engine
            .create_reservation(&awa, request(location, "Répétition", DAY, DAY + H))
            .await
            .unwrap();
        let decided = engine
            .create_reservation(&awa, request(location, "Concert", DAY + 2 * H, DAY + 3 * H))
            .await
            .unwrap();
        let decided = engine
            .reject_reservation(&cee, decided.id, "Concert déjà programmé")
            .await
            .unwrap();

        assert!(engine.wal_appends_since_compact().await >= 25);
        let before = std::fs::metadata(&path).unwrap().len();
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert!(std::fs::metadata(&path).unwrap().len() < before);
        (kept, decided, location)
    };

    let engine = Engine::new(path, Arc::new(NotifyHub::new()), Outbox::disabled()).unwrap();
    assert_eq!(engine.get_reservation(kept.id).await, Some(kept));
    assert_eq!(engine.get_reservation(decided.id).await, Some(decided));
    assert_eq!(
        engine
            .find_reservations(location, &ReservationStatus::ALL)
            .await
            .len(),
        2
    );
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_for_one_slot_admit_exactly_one() {
    let f = fixture("race.wal").await;
    let location = f.location;
    let engine = Arc::new(f.engine);

    let handles: Vec<_> = (0..32)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let actor = student(&format!("Etudiant{i}"));
                // Every request overlaps every other around 11:00.
                let start = DAY + 10 * H + (i % 4) * 15 * M;
                engine
                    .create_reservation(&actor, request(location, "Soirée dansante", start, start + 2 * H))
                    .await
            })
        })
        .collect();

    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(
        engine
            .find_reservations(location, &[ReservationStatus::Pending])
            .await
            .len(),
        1
    );
}

// ── Notifications ────────────────────────────────────────

struct Forward(tokio::sync::mpsc::UnboundedSender<(String, String)>);

#[async_trait::async_trait]
impl Mailer for Forward {
    async fn send(&self, to: &str, message: &EmailMessage) -> Result<(), MailError> {
        let _ = self.0.send((to.to_string(), message.subject.clone()));
        Ok(())
    }
}

async fn next_mail(rx: &mut tokio::sync::mpsc::UnboundedReceiver<(String, String)>) -> (String, String) {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn commission_and_requester_are_mailed() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let outbox = Outbox::spawn(Arc::new(Forward(tx)), FixedOffset::east_opt(0).unwrap(), 16);
    let f = fixture_with("mailed.wal", None, outbox).await;
    let awa = student("Awa");

    let r = f
        .engine
        .create_reservation(&awa, request(f.location, "Nuit du cinéma", DAY + 20 * H, DAY + 23 * H))
        .await
        .unwrap();
    assert_eq!(
        next_mail(&mut rx).await,
        (
            "moussa@esp.sn".to_string(),
            "🔔 Nouvelle demande de réservation - Nuit du cinéma".to_string()
        )
    );

    f.engine.accept_reservation(&f.cee, r.id).await.unwrap();
    assert_eq!(
        next_mail(&mut rx).await,
        (
            "awa@esp.sn".to_string(),
            "✅ Réservation acceptée - Nuit du cinéma".to_string()
        )
    );

    // Refused requests send nothing.
    let _ = f
        .engine
        .create_reservation(&awa, request(f.location, "Doublon du soir", DAY + 21 * H, DAY + 22 * H))
        .await
        .unwrap_err();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn subscribers_see_location_events() {
    let f = fixture("subscribers.wal").await;
    let mut rx = f.engine.notify.subscribe(f.location);
    let r = f
        .engine
        .create_reservation(&student("Awa"), request(f.location, "Conférence", DAY, DAY + H))
        .await
        .unwrap();
    match rx.recv().await.unwrap() {
        Event::ReservationCreated { id, .. } => assert_eq!(id, r.id),
        other => panic!("unexpected event {other:?}"),
    }
}
