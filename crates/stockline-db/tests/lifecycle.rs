//! End-to-end channel lifecycle against SQLite.

use chrono::Utc;
use stockline_core::channel::{ChannelType, StaffAssignment};
use stockline_core::events::DomainEvent;
use stockline_core::request::{AllocationRow, ReceivingLine, RequestStatus};
use stockline_core::sale::{Adjustment, CancelOutcome, SaleLine};
use stockline_core::{
    ChannelStatus, CloseOutInput, CoreError, Money, NewChannel, NewSale, SalesChannel,
    StockRequest, StockWarning,
};
use stockline_db::{Database, DbConfig, LedgerTotals, ReceivingSummary};
use uuid::Uuid;

// =============================================================================
// Helpers
// =============================================================================

const PRICE: i64 = 100;

fn branch(initial_quantity: i64) -> NewChannel {
    NewChannel {
        channel_type: ChannelType::Branch,
        name: "Mega Bangna".into(),
        location: "Mega Bangna 2F".into(),
        start_date: None,
        end_date: None,
        staff: vec![StaffAssignment {
            staff_id: "EMP-100".into(),
            role: "manager".into(),
        }],
        initial_quantity,
        notes: String::new(),
        sales_target: None,
    }
}

fn allocation(rows: &[(&str, i64)]) -> Vec<AllocationRow> {
    rows.iter()
        .map(|(barcode, qty)| AllocationRow {
            barcode: barcode.to_string(),
            size: "F".into(),
            packed_quantity: *qty,
            unit_price: Money::from_cents(PRICE),
            product_ref: None,
        })
        .collect()
}

fn receiving(rows: &[(&str, i64)]) -> Vec<ReceivingLine> {
    rows.iter()
        .map(|(barcode, qty)| ReceivingLine {
            barcode: barcode.to_string(),
            allocated_qty: *qty,
            received_qty: *qty,
        })
        .collect()
}

/// Walks a request from `draft` to `shipped`.
async fn ship(db: &Database, request_id: &str, rows: &[(&str, i64)]) {
    db.requests().submit(request_id).await.unwrap();
    db.requests().approve(request_id).await.unwrap();
    db.requests()
        .upload_allocation(request_id, &allocation(rows))
        .await
        .unwrap();
    db.requests().pack(request_id).await.unwrap();
    db.requests()
        .create_shipment(request_id, "Flash Express", "TH0123456789")
        .await
        .unwrap();
}

async fn deliver(db: &Database, request_id: &str, rows: &[(&str, i64)]) -> ReceivingSummary {
    ship(db, request_id, rows).await;
    db.requests()
        .confirm_receiving(request_id, &receiving(rows))
        .await
        .unwrap()
}

/// An approved branch whose INITIAL request delivered exactly `rows`.
async fn active_channel(db: &Database, rows: &[(&str, i64)]) -> (SalesChannel, StockRequest) {
    let total = rows.iter().map(|(_, q)| q).sum();
    let (channel, initial) = db.channels().create(&branch(total)).await.unwrap();
    db.channels().submit(&channel.id).await.unwrap();
    db.channels().approve(&channel.id).await.unwrap();
    let summary = deliver(db, &initial.id, rows).await;
    let channel = summary.activated_channel.expect("channel activated");
    (channel, initial)
}

fn basket(channel_id: &str, barcode: &str, qty: i64) -> NewSale {
    NewSale::new(
        channel_id,
        vec![SaleLine::new(barcode, qty, Money::from_cents(PRICE))],
    )
}

async fn memory_db() -> Database {
    Database::new(DbConfig::in_memory()).await.unwrap()
}

async fn event_types(db: &Database, channel_id: &str) -> Vec<String> {
    db.events()
        .for_channel(channel_id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect()
}

// =============================================================================
// Stock request pipeline and activation
// =============================================================================

#[tokio::test]
async fn initial_delivery_credits_ledger_and_activates_channel() {
    let db = memory_db().await;
    let rows = [("SKU-A", 200), ("SKU-B", 150), ("SKU-C", 150)];

    let (channel, initial) = active_channel(&db, &rows).await;

    assert_eq!(channel.status, ChannelStatus::Active);
    let stored = db.channels().get(&channel.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ChannelStatus::Active);

    let totals = db.ledger().totals(&channel.id).await.unwrap();
    assert_eq!(
        totals,
        LedgerTotals {
            received: 500,
            sold: 0,
            remaining: 500
        }
    );
    assert_eq!(db.ledger().remaining(&channel.id, "SKU-B").await.unwrap(), 150);

    let request = db.requests().get(&initial.id).await.unwrap().unwrap();
    assert_eq!(request.status, RequestStatus::Received);
    let history = db.events().request_history(&initial.id).await.unwrap();
    assert_eq!(history.len(), 6);

    let types = event_types(&db, &channel.id).await;
    assert_eq!(
        types,
        [
            "channel_created",
            "stock_request_created",
            "request_received",
            "channel_activated"
        ]
    );
}

#[tokio::test]
async fn receiving_before_approval_activates_on_approve() {
    let db = memory_db().await;
    let rows = [("SKU-A", 10)];
    let (channel, initial) = db.channels().create(&branch(10)).await.unwrap();
    db.channels().submit(&channel.id).await.unwrap();

    let summary = deliver(&db, &initial.id, &rows).await;
    assert!(summary.activated_channel.is_none());
    let waiting = db.channels().get(&channel.id).await.unwrap().unwrap();
    assert_eq!(waiting.status, ChannelStatus::Submitted);

    let approved = db.channels().approve(&channel.id).await.unwrap();
    assert_eq!(approved.status, ChannelStatus::Active);

    let history = db.events().channel_history(&channel.id).await.unwrap();
    let moves: Vec<_> = history
        .iter()
        .map(|c| (c.from_status.as_str(), c.to_status.as_str()))
        .collect();
    assert_eq!(
        moves,
        [
            ("draft", "submitted"),
            ("submitted", "approved"),
            ("approved", "active")
        ]
    );
}

#[tokio::test]
async fn short_allocation_is_a_warning() {
    let db = memory_db().await;
    let (_, initial) = db.channels().create(&branch(500)).await.unwrap();
    db.requests().submit(&initial.id).await.unwrap();
    db.requests().approve(&initial.id).await.unwrap();

    let outcome = db
        .requests()
        .upload_allocation(
            &initial.id,
            &allocation(&[("SKU-A", 200), ("SKU-B", 150), ("SKU-C", 130)]),
        )
        .await
        .unwrap();

    assert_eq!(
        outcome.warnings,
        vec![StockWarning::QuantityMismatch {
            request_id: initial.id.clone(),
            requested: 500,
            allocated: 480,
        }]
    );
    let request = db.requests().get(&initial.id).await.unwrap().unwrap();
    assert_eq!(request.status, RequestStatus::Allocated);
    assert_eq!(db.requests().allocations(&initial.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn received_count_is_ground_truth() {
    let db = memory_db().await;
    let (channel, initial) = db.channels().create(&branch(20)).await.unwrap();
    db.channels().approve(&channel.id).await.unwrap();
    ship(&db, &initial.id, &[("SKU-A", 12), ("SKU-B", 8)]).await;

    let lines = vec![
        ReceivingLine {
            barcode: "SKU-A".into(),
            allocated_qty: 12,
            received_qty: 11,
        },
        ReceivingLine {
            barcode: "SKU-B".into(),
            allocated_qty: 8,
            received_qty: 8,
        },
    ];
    let summary = db
        .requests()
        .confirm_receiving(&initial.id, &lines)
        .await
        .unwrap();

    assert_eq!(summary.total_received, 19);
    assert_eq!(summary.discrepancies, vec![lines[0].clone()]);
    assert_eq!(
        db.requests().discrepancies(&initial.id).await.unwrap(),
        vec![lines[0].clone()]
    );
    assert_eq!(db.ledger().remaining(&channel.id, "SKU-A").await.unwrap(), 11);
}

#[tokio::test]
async fn duplicate_receiving_line_rejects_the_batch() {
    let db = memory_db().await;
    let (channel, initial) = db.channels().create(&branch(4)).await.unwrap();
    db.channels().approve(&channel.id).await.unwrap();
    ship(&db, &initial.id, &[("SKU-A", 4)]).await;

    let mut lines = receiving(&[("SKU-A", 2)]);
    lines.push(lines[0].clone());
    let err = db
        .requests()
        .confirm_receiving(&initial.id, &lines)
        .await
        .unwrap_err();

    assert!(matches!(err.as_domain(), Some(CoreError::Validation(_))));
    let request = db.requests().get(&initial.id).await.unwrap().unwrap();
    assert_eq!(request.status, RequestStatus::Shipped);
    assert_eq!(db.ledger().totals(&channel.id).await.unwrap().received, 0);
}

#[tokio::test]
async fn topup_adds_stock_without_reactivating() {
    let db = memory_db().await;
    let (channel, _) = active_channel(&db, &[("SKU-A", 5)]).await;

    let topup = db
        .requests()
        .create_topup(&channel.id, 7, "weekend rush")
        .await
        .unwrap();
    let summary = deliver(&db, &topup.id, &[("SKU-A", 3), ("SKU-D", 4)]).await;

    assert!(summary.activated_channel.is_none());
    assert_eq!(db.ledger().remaining(&channel.id, "SKU-A").await.unwrap(), 8);
    assert_eq!(db.ledger().remaining(&channel.id, "SKU-D").await.unwrap(), 4);

    let requests = db.requests().list_for_channel(&channel.id).await.unwrap();
    assert_eq!(requests.len(), 2);

    let activations = event_types(&db, &channel.id)
        .await
        .into_iter()
        .filter(|t| t == "channel_activated")
        .count();
    assert_eq!(activations, 1);
}

// =============================================================================
// Sales
// =============================================================================

#[tokio::test]
async fn sale_total_and_idempotent_cancel() {
    let db = memory_db().await;
    let (channel, _) = active_channel(&db, &[("SKU-A", 20)]).await;

    let sale = db
        .sales()
        .create(
            &basket(&channel.id, "SKU-A", 5)
                .with_adjustment(Adjustment::new("Delivery", Money::from_cents(50)))
                .with_bill_discount(Money::from_cents(20)),
        )
        .await
        .unwrap();
    assert_eq!(sale.sale.total(), Money::from_cents(530));
    assert_eq!(db.ledger().remaining(&channel.id, "SKU-A").await.unwrap(), 15);

    let first = db.sales().cancel(&sale.sale.id, "duplicate scan").await.unwrap();
    assert_eq!(first, CancelOutcome::Cancelled);
    assert_eq!(db.ledger().remaining(&channel.id, "SKU-A").await.unwrap(), 20);

    let second = db.sales().cancel(&sale.sale.id, "duplicate scan").await.unwrap();
    assert_eq!(second, CancelOutcome::AlreadyCancelled);
    assert_eq!(db.ledger().remaining(&channel.id, "SKU-A").await.unwrap(), 20);

    let cancelled = event_types(&db, &channel.id)
        .await
        .into_iter()
        .filter(|t| t == "sale_cancelled")
        .count();
    assert_eq!(cancelled, 1);
}

#[tokio::test]
async fn basket_is_all_or_nothing() {
    let db = memory_db().await;
    let (channel, _) = active_channel(&db, &[("SKU-A", 10), ("SKU-B", 1)]).await;

    let input = NewSale::new(
        channel.id.clone(),
        vec![
            SaleLine::new("SKU-A", 3, Money::from_cents(PRICE)),
            SaleLine::new("SKU-B", 2, Money::from_cents(PRICE)),
        ],
    );
    let err = db.sales().create(&input).await.unwrap_err();

    match err.as_domain() {
        Some(CoreError::InsufficientStock {
            barcode,
            requested,
            available,
        }) => {
            assert_eq!(barcode, "SKU-B");
            assert_eq!((*requested, *available), (2, 1));
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(db.ledger().totals(&channel.id).await.unwrap().sold, 0);
}

#[tokio::test]
async fn no_sales_before_activation() {
    let db = memory_db().await;
    let (channel, _) = db.channels().create(&branch(5)).await.unwrap();
    db.channels().approve(&channel.id).await.unwrap();

    let err = db
        .sales()
        .create(&basket(&channel.id, "SKU-A", 1))
        .await
        .unwrap_err();
    assert!(matches!(
        err.as_domain(),
        Some(CoreError::InvalidTransition { .. })
    ));
}

// =============================================================================
// Close-out and return
// =============================================================================

#[tokio::test]
async fn close_out_clamps_and_freezes_the_channel() {
    let db = memory_db().await;
    let (channel, _) = active_channel(&db, &[("SKU-A", 30), ("SKU-B", 6)]).await;
    let sale = db
        .sales()
        .create(&basket(&channel.id, "SKU-A", 10))
        .await
        .unwrap();

    let outcome = db
        .closeouts()
        .close_channel_stock(&channel.id, &[CloseOutInput::new("SKU-A", 5, 25)])
        .await
        .unwrap();

    let a = &outcome.value[0];
    assert_eq!(
        (a.remaining, a.damaged, a.missing, a.returned),
        (20, 5, 15, 0)
    );
    assert_eq!(outcome.warnings.len(), 1);
    assert_eq!(outcome.value[1].returned, 6);

    // Sold is untouched and the books balance.
    assert_eq!(db.ledger().totals(&channel.id).await.unwrap().sold, 10);
    assert!(db
        .closeouts()
        .verify_conservation(&channel.id)
        .await
        .unwrap()
        .is_empty());

    let err = db
        .sales()
        .create(&basket(&channel.id, "SKU-B", 1))
        .await
        .unwrap_err();
    assert!(matches!(
        err.as_domain(),
        Some(CoreError::InvalidTransition { .. })
    ));

    let err = db
        .sales()
        .cancel(&sale.sale.id, "too late")
        .await
        .unwrap_err();
    assert!(matches!(
        err.as_domain(),
        Some(CoreError::InvalidTransition { .. })
    ));
    let stored = db.sales().get(&sale.sale.id).await.unwrap().unwrap();
    assert!(!stored.sale.is_cancelled());
}

#[tokio::test]
async fn stock_cannot_land_after_close_out() {
    let db = memory_db().await;
    let (channel, _) = active_channel(&db, &[("SKU-A", 3)]).await;
    let topup = db.requests().create_topup(&channel.id, 2, "").await.unwrap();
    ship(&db, &topup.id, &[("SKU-A", 2)]).await;

    db.closeouts()
        .close_channel_stock(&channel.id, &[])
        .await
        .unwrap();

    let err = db
        .requests()
        .confirm_receiving(&topup.id, &receiving(&[("SKU-A", 2)]))
        .await
        .unwrap_err();
    assert!(matches!(
        err.as_domain(),
        Some(CoreError::InvalidTransition { .. })
    ));
    let request = db.requests().get(&topup.id).await.unwrap().unwrap();
    assert_eq!(request.status, RequestStatus::Shipped);
    assert_eq!(db.ledger().remaining(&channel.id, "SKU-A").await.unwrap(), 3);
}

#[tokio::test]
async fn return_and_payment_flow() {
    let db = memory_db().await;
    let (channel, _) = active_channel(&db, &[("SKU-A", 4)]).await;
    db.sales()
        .create(&basket(&channel.id, "SKU-A", 1))
        .await
        .unwrap();
    db.closeouts()
        .close_channel_stock(&channel.id, &[])
        .await
        .unwrap();

    let shipped = db
        .channels()
        .ship_return(&channel.id, "Flash Express", "TH-RET-1")
        .await
        .unwrap();
    assert!(shipped.received_at.is_none());

    let before = Utc::now();
    let received = db.channels().confirm_return(&channel.id).await.unwrap();
    let received_at = received.received_at.expect("received_at set");
    assert!(received_at >= before - chrono::Duration::seconds(1));

    let completed = db.channels().close_manual(&channel.id).await.unwrap();
    assert_eq!(completed.status, ChannelStatus::Completed);
    db.channels().submit_for_payment(&channel.id).await.unwrap();
    let paid = db.channels().approve_payment(&channel.id).await.unwrap();
    assert_eq!(paid.status, ChannelStatus::PaymentApproved);

    let err = db.channels().submit(&channel.id).await.unwrap_err();
    match err.as_domain() {
        Some(CoreError::InvalidTransition {
            entity,
            expected,
            actual,
        }) => {
            assert_eq!(entity, "channel");
            assert_eq!(expected, "draft");
            assert_eq!(actual, "payment_approved");
        }
        other => panic!("unexpected: {other:?}"),
    }

    let events = db.events().for_channel(&channel.id).await.unwrap();
    let decoded: Vec<DomainEvent> = events.iter().map(|e| e.decode().unwrap()).collect();
    assert!(matches!(decoded.first(), Some(DomainEvent::ChannelCreated { .. })));
    assert!(decoded
        .iter()
        .any(|e| matches!(e, DomainEvent::ReturnShipped { tracking_number, .. } if tracking_number == "TH-RET-1")));
    assert!(matches!(decoded.last(), Some(DomainEvent::ReturnReceived { .. })));
}

// =============================================================================
// Concurrency (on-disk WAL database, several connections)
// =============================================================================

struct TempDb {
    path: std::path::PathBuf,
}

impl TempDb {
    fn new() -> Self {
        TempDb {
            path: std::env::temp_dir().join(format!("stockline-{}.db", Uuid::new_v4())),
        }
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = self.path.clone().into_os_string();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_terminals_never_oversell() {
    let temp = TempDb::new();
    let db = Database::new(DbConfig::new(temp.path.clone()).max_connections(4))
        .await
        .unwrap();
    let (channel, _) = active_channel(&db, &[("SKU-A", 13)]).await;

    db.sales()
        .create(&basket(&channel.id, "SKU-A", 3))
        .await
        .unwrap();
    assert_eq!(db.ledger().remaining(&channel.id, "SKU-A").await.unwrap(), 10);

    // Two terminals each want 6 of the 10 left.
    let mut handles = Vec::new();
    for _ in 0..2 {
        let db = db.clone();
        let channel_id = channel.id.clone();
        handles.push(tokio::spawn(async move {
            db.sales().create(&basket(&channel_id, "SKU-A", 6)).await
        }));
    }

    let mut sold = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => sold += 1,
            Err(err) => {
                assert!(matches!(
                    err.as_domain(),
                    Some(CoreError::InsufficientStock {
                        requested: 6,
                        available: 4,
                        ..
                    })
                ));
                rejected += 1;
            }
        }
    }
    assert_eq!((sold, rejected), (1, 1));

    // Eight single-piece sales race for the last four.
    let mut handles = Vec::new();
    for _ in 0..8 {
        let db = db.clone();
        let channel_id = channel.id.clone();
        handles.push(tokio::spawn(async move {
            db.sales().create(&basket(&channel_id, "SKU-A", 1)).await
        }));
    }
    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 4);

    let totals = db.ledger().totals(&channel.id).await.unwrap();
    assert_eq!(
        totals,
        LedgerTotals {
            received: 13,
            sold: 13,
            remaining: 0
        }
    );
    assert_eq!(db.sales().list_for_channel(&channel.id).await.unwrap().len(), 6);

    db.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sale_racing_close_out_is_either_counted_or_rejected() {
    let temp = TempDb::new();
    let db = Database::new(DbConfig::new(temp.path.clone()).max_connections(4))
        .await
        .unwrap();
    let (channel, _) = active_channel(&db, &[("SKU-A", 10)]).await;

    let sale = {
        let db = db.clone();
        let channel_id = channel.id.clone();
        tokio::spawn(async move { db.sales().create(&basket(&channel_id, "SKU-A", 2)).await })
    };
    let close = {
        let db = db.clone();
        let channel_id = channel.id.clone();
        tokio::spawn(async move { db.closeouts().close_channel_stock(&channel_id, &[]).await })
    };

    let sale = sale.await.unwrap();
    let closed = close.await.unwrap().unwrap();

    let returned = closed.value[0].returned;
    match sale {
        Ok(_) => assert_eq!(returned, 8),
        Err(err) => {
            assert!(matches!(
                err.as_domain(),
                Some(CoreError::InvalidTransition { .. })
            ));
            assert_eq!(returned, 10);
        }
    }
    assert!(db
        .closeouts()
        .verify_conservation(&channel.id)
        .await
        .unwrap()
        .is_empty());

    db.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_approvals_apply_once() {
    let temp = TempDb::new();
    let db = Database::new(DbConfig::new(temp.path.clone()).max_connections(4))
        .await
        .unwrap();
    let (channel, initial) = db.channels().create(&branch(10)).await.unwrap();
    db.channels().submit(&channel.id).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let db = db.clone();
        let channel_id = channel.id.clone();
        handles.push(tokio::spawn(async move { db.channels().approve(&channel_id).await }));
    }

    let mut approved = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(channel) => {
                assert_eq!(channel.status, ChannelStatus::Approved);
                approved += 1;
            }
            Err(err) => assert!(matches!(
                err.as_domain(),
                Some(CoreError::InvalidTransition { .. } | CoreError::ConcurrencyConflict { .. })
            )),
        }
    }
    assert_eq!(approved, 1);

    let history = db.events().channel_history(&channel.id).await.unwrap();
    let approvals: Vec<_> = history
        .iter()
        .filter(|change| change.to_status == "approved")
        .collect();
    assert_eq!(approvals.len(), 1);
    assert_eq!(approvals[0].from_status, "submitted");

    // Same for the request pipeline.
    let mut handles = Vec::new();
    for _ in 0..6 {
        let db = db.clone();
        let request_id = initial.id.clone();
        handles.push(tokio::spawn(async move { db.requests().submit(&request_id).await }));
    }
    let mut submitted = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            submitted += 1;
        }
    }
    assert_eq!(submitted, 1);

    let history = db.events().request_history(&initial.id).await.unwrap();
    assert_eq!(
        history
            .iter()
            .filter(|change| change.to_status == "submitted")
            .count(),
        1
    );

    db.close().await;
}
