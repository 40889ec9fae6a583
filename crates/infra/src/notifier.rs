//! Push notifications driven by committed order events.
//!
//! The notifier runs on its own thread, drains a bus subscription and hands
//! each message to a [`PushSender`] on the async runtime. Tokens the
//! provider reports as dead are pruned from the device registry.
//!
//! Delivery is best effort: a failed send is logged and the event is not
//! retried. Redelivered events can produce a duplicate push.

use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use shopdesk_events::{EventBus, EventEnvelope, Subscription};
use shopdesk_notifications::{PushMessage, PushSender, SendReport, order_placed_message, status_changed_message};
use shopdesk_orders::order::AGGREGATE_TYPE as ORDER;
use shopdesk_orders::OrderEvent;

use crate::backoffice::Backoffice;
use crate::projections::{ProjectionError, decode};

/// Handle to stop and join the notifier thread.
#[derive(Debug)]
pub struct NotifierHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl NotifierHandle {
    /// Request shutdown and wait for the thread to finish.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

#[derive(Clone)]
pub struct Notifier {
    backoffice: Arc<Backoffice>,
    sender: Arc<dyn PushSender>,
    runtime: Handle,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier").finish_non_exhaustive()
    }
}

impl Notifier {
    pub fn new(backoffice: Arc<Backoffice>, sender: Arc<dyn PushSender>, runtime: Handle) -> Self {
        Self {
            backoffice,
            sender,
            runtime,
        }
    }

    /// Subscribe to `bus` and process messages on a dedicated thread.
    pub fn spawn<B>(self, bus: &B) -> std::io::Result<NotifierHandle>
    where
        B: EventBus<EventEnvelope<JsonValue>>,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let subscription = bus.subscribe();

        let join = thread::Builder::new()
            .name("push-notifier".to_string())
            .spawn(move || self.run(subscription, shutdown_rx))?;

        Ok(NotifierHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }

    fn run(&self, subscription: Subscription<EventEnvelope<JsonValue>>, shutdown: mpsc::Receiver<()>) {
        // Store backends that block on the runtime look it up from the thread context.
        let _runtime = self.runtime.enter();
        let tick = Duration::from_millis(250);
        loop {
            if shutdown.try_recv().is_ok() {
                break;
            }
            match subscription.recv_timeout(tick) {
                Ok(envelope) => {
                    if let Err(err) = self.handle(&envelope) {
                        warn!(event_type = envelope.event_type(), error = %err, "push notification skipped");
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("push notifier stopped");
    }

    /// Sends whatever push `envelope` calls for. Must not be called from a
    /// runtime worker thread.
    pub fn handle(&self, envelope: &EventEnvelope<JsonValue>) -> Result<Option<SendReport>, ProjectionError> {
        let Some((tokens, message)) = self.compose(envelope)? else {
            return Ok(None);
        };
        if tokens.is_empty() {
            debug!(event_type = envelope.event_type(), "no devices to notify");
            return Ok(None);
        }
        let report = self.runtime.block_on(self.sender.send(&tokens, &message));
        self.prune(&report);
        Ok(Some(report))
    }

    /// Test push for the API: sends and prunes from async context.
    pub async fn send_test(&self, tokens: &[String]) -> SendReport {
        let report = self.sender.send(tokens, &shopdesk_notifications::test_message()).await;
        self.prune(&report);
        report
    }

    fn compose(&self, envelope: &EventEnvelope<JsonValue>) -> Result<Option<(Vec<String>, PushMessage)>, ProjectionError> {
        if envelope.aggregate_type() != ORDER {
            return Ok(None);
        }
        let devices = &self.backoffice.projections().devices;

        match decode::<OrderEvent>(envelope)? {
            OrderEvent::Placed(e) => {
                let message = order_placed_message(
                    e.order_id.0,
                    Some(e.shipping.name.as_str()),
                    Some(e.shipping.phone.as_str()),
                    e.total,
                );
                Ok(Some((devices.admin_tokens(), message)))
            }
            OrderEvent::StatusChanged(e) => {
                let customer = self.backoffice.projections().orders.get(&e.order_id).and_then(|o| o.customer_id);
                let tokens = customer.map(|c| devices.tokens_for_user(c)).unwrap_or_default();
                Ok(Some((tokens, status_changed_message(e.order_id.0, e.from, e.to))))
            }
            _ => Ok(None),
        }
    }

    fn prune(&self, report: &SendReport) {
        for token in report.dead_tokens() {
            match self.backoffice.prune_device(&token) {
                Ok(()) => info!(token_prefix = %token.chars().take(16).collect::<String>(), "dead push token removed"),
                Err(err) => warn!(error = %err, "failed to remove dead push token"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use shopdesk_core::Money;
    use shopdesk_notifications::SendError;
    use shopdesk_orders::OrderPaymentMethod;

    use super::*;
    use crate::backoffice::testing::{address, admin, backoffice, cashier, customer, product};
    use crate::backoffice::{OrderLineRequest, PlaceOnlineOrder, PosLine, PosSale};

    /// Records every send and fails tokens starting with `dead`.
    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(Vec<String>, PushMessage)>>,
    }

    #[async_trait]
    impl PushSender for RecordingSender {
        async fn send(&self, tokens: &[String], message: &PushMessage) -> SendReport {
            self.sent.lock().unwrap().push((tokens.to_vec(), message.clone()));
            let mut report = SendReport::default();
            for token in tokens {
                if token.starts_with("dead") {
                    report.record_failure(SendError {
                        token: token.clone(),
                        code: "UNREGISTERED".into(),
                        message: "gone".into(),
                    });
                } else {
                    report.record_success();
                }
            }
            report
        }
    }

    struct Fixture {
        backoffice: Arc<Backoffice>,
        sender: Arc<RecordingSender>,
        notifier: Notifier,
        subscription: Subscription<EventEnvelope<JsonValue>>,
        _runtime: tokio::runtime::Runtime,
    }

    fn fixture() -> Fixture {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let backoffice = Arc::new(backoffice());
        let sender = Arc::new(RecordingSender::default());
        let subscription = backoffice.bus().subscribe();
        let notifier = Notifier::new(backoffice.clone(), sender.clone(), runtime.handle().clone());
        Fixture { backoffice, sender, notifier, subscription, _runtime: runtime }
    }

    fn drain(f: &Fixture) {
        while let Ok(envelope) = f.subscription.try_recv() {
            f.notifier.handle(&envelope).unwrap();
        }
    }

    fn place(f: &Fixture, buyer: &shopdesk_auth::Principal) -> shopdesk_orders::OrderId {
        let rice = product(&f.backoffice, "Rice", 60, 10);
        f.backoffice
            .place_order(
                buyer,
                &PlaceOnlineOrder {
                    items: vec![OrderLineRequest { product_id: rice, quantity: 2 }],
                    payment_method: OrderPaymentMethod::Cod,
                    shipping: address(),
                    payment_reference: None,
                },
            )
            .unwrap()
            .id
    }

    #[test]
    fn new_orders_reach_admin_devices_and_dead_tokens_are_pruned() {
        let f = fixture();
        let shopkeeper = admin();
        f.backoffice.register_device(&shopkeeper, "admin-1", None, true).unwrap();
        f.backoffice.register_device(&shopkeeper, "dead-admin", None, true).unwrap();
        drain(&f);

        place(&f, &customer());
        drain(&f);

        let sent = f.sender.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, vec!["admin-1".to_string(), "dead-admin".to_string()]);
        assert!(sent[0].1.title.starts_with("New order #"));
        assert_eq!(sent[0].1.body, "Asha placed an order • ₹120.00");
        assert_eq!(f.backoffice.projections().devices.admin_tokens(), vec!["admin-1".to_string()]);
    }

    #[test]
    fn counter_sales_reach_admin_devices_too() {
        let f = fixture();
        f.backoffice.register_device(&admin(), "admin-1", None, true).unwrap();
        let soap = product(&f.backoffice, "Soap", 40, 5);
        drain(&f);

        f.backoffice
            .pos_checkout(
                &cashier(),
                &PosSale {
                    items: vec![PosLine { product_id: soap, name: None, quantity: 1, unit_price: Money::from_rupees(40) }],
                    paid: true,
                    ..Default::default()
                },
            )
            .unwrap();
        drain(&f);

        // The walk-in customer has no devices, so only the admin push goes out.
        let sent = f.sender.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, vec!["admin-1".to_string()]);
        assert_eq!(sent[0].1.body, "POS Customer placed an order • ₹40.00");
    }

    #[test]
    fn status_changes_reach_the_customer() {
        let f = fixture();
        let buyer = customer();
        f.backoffice.register_device(&buyer, "phone-1", Some("ios"), false).unwrap();
        let order_id = place(&f, &buyer);
        drain(&f);

        f.backoffice.change_order_status(&admin(), order_id, "SHIPPED").unwrap();
        drain(&f);

        let sent = f.sender.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, vec!["phone-1".to_string()]);
        assert_eq!(sent[0].1.data["new_status"], "SHIPPED");
        assert_eq!(sent[0].1.data["old_status"], "PENDING");
    }

    #[test]
    fn worker_thread_stops_on_shutdown() {
        let f = fixture();
        let handle = f.notifier.clone().spawn(f.backoffice.bus()).unwrap();
        handle.shutdown();
    }
}
