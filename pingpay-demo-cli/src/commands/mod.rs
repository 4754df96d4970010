//! CLI command implementations

pub mod checkout;
pub mod config;
pub mod subscriptions;

use crate::ui;
use pingpay_subscriptions::SubscriptionView;

/// Decimal places used when rendering amounts.
pub const DISPLAY_DECIMALS: u32 = 2;

/// Print one subscription.
pub fn print_view(view: &SubscriptionView) {
    ui::key_value("ID", view.id.as_str());
    ui::key_value("Plan", &view.plan_id);
    ui::key_value("Subscriber", view.subscriber.as_str());
    ui::key_value("Merchant", view.merchant.as_str());
    ui::key_value("Status", &ui::status(view.status));
    ui::key_value(
        "Amount",
        &format!(
            "{} / {}",
            view.amount.to_display(DISPLAY_DECIMALS),
            view.frequency.label()
        ),
    );
    ui::key_value("Total", &view.total_cost_text(DISPLAY_DECIMALS));

    let progress = match (view.max_payments, view.progress()) {
        (Some(max), Some(ratio)) => format!(
            "{}/{} ({:.0}%)",
            view.payments_made,
            max,
            ratio * 100.0
        ),
        _ => format!("{} payments", view.payments_made),
    };
    ui::key_value("Payments", &progress);

    if let Some(next) = view.next_payment_date {
        ui::key_value("Next payment", &next.format("%Y-%m-%d %H:%M UTC").to_string());
    }
    if let Some(last) = view.last_payment_date {
        ui::key_value("Last payment", &last.format("%Y-%m-%d %H:%M UTC").to_string());
    }
    if let Some(end) = view.end_date {
        ui::key_value("Ends", &end.format("%Y-%m-%d").to_string());
    }
    ui::key_value("Key", &view.public_key.to_string());
    for payment in &view.payment_history {
        let when = payment.timestamp.format("%Y-%m-%d %H:%M UTC");
        let detail = match (&payment.error, &payment.transaction_id) {
            (Some(error), _) => format!("failed on {}: {}", when, error),
            (None, Some(tx)) => format!(
                "{} on {} ({})",
                payment.amount.to_display(DISPLAY_DECIMALS),
                when,
                tx
            ),
            (None, None) => format!(
                "{} on {} (reconciled)",
                payment.amount.to_display(DISPLAY_DECIMALS),
                when
            ),
        };
        ui::key_value(&format!("Payment #{}", payment.payment_number), &detail);
    }
    ui::info(view.status_message());
}
