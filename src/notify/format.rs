//! HTML message bodies for alerts.

use super::{Alert, SignalContext};
use crate::market::{IvQuality, IvSnapshot, Side};
use crate::strategy::{ArbitrageSignal, SignalKind, StraddleLeg, TradeRecommendation};
use rust_decimal::Decimal;

/// Render an alert as Telegram-flavoured HTML.
pub fn format_alert(alert: &Alert) -> String {
    match alert {
        Alert::Signal { signal, context } => format_signal(signal, context),
        Alert::DataUnavailable {
            instrument_id,
            instrument_name,
            sides,
        } => {
            let sides: Vec<String> = sides.iter().map(Side::to_string).collect();
            format!(
                "⚠️ <b>Volatility data unavailable</b>\n\n\
                 Instrument: {} ({})\n\
                 Missing: {}\n\n\
                 All sources failed. No signals for this instrument until data returns.",
                escape(instrument_name),
                escape(instrument_id),
                sides.join(", ")
            )
        }
        Alert::StoreFailure {
            instrument_id,
            error,
        } => format!(
            "❌ <b>Position store write failed</b>\n\n\
             Instrument: {}\n\
             Error: <code>{}</code>\n\n\
             The transition was not applied and will be retried next cycle.",
            escape(instrument_id),
            escape(error)
        ),
        Alert::Started {
            instruments,
            poll_interval_secs,
        } => {
            let list: Vec<String> = instruments.iter().map(|i| format!("• {}", escape(i))).collect();
            format!(
                "🚀 <b>IV spread monitor started</b>\n\n\
                 Instruments:\n{}\n\n\
                 Poll interval: {}s",
                list.join("\n"),
                poll_interval_secs
            )
        }
        Alert::Stopped {
            cycles,
            signals,
            outages,
        } => format!(
            "⏹ <b>IV spread monitor stopped</b>\n\n\
             Cycles: {cycles}\n\
             Signals: {signals}\n\
             Data outages: {outages}"
        ),
    }
}

fn format_signal(signal: &ArbitrageSignal, ctx: &SignalContext) -> String {
    let title = match signal.kind {
        SignalKind::Open { strength } => format!("🚨 <b>OPEN signal ({strength})</b>"),
        SignalKind::Close { reason, .. } => format!("✅ <b>CLOSE signal ({reason})</b>"),
    };

    let mut lines = vec![
        title,
        String::new(),
        format!(
            "<b>{}</b> {}",
            escape(&ctx.instrument_name),
            escape(&ctx.instrument_name_en)
        ),
        iv_line(&ctx.domestic_exchange, &ctx.domestic),
        iv_line(&ctx.foreign_exchange, &ctx.foreign),
        format!("Spread: {}", fmt_diff(signal.diff_at_signal)),
    ];

    match signal.kind {
        SignalKind::Open { .. } => {
            lines.push(format!(
                "Thresholds: open {} / close {} / stop {}",
                ctx.thresholds.open, ctx.thresholds.close, ctx.thresholds.stop_loss
            ));
            lines.push(format!("Direction: {}", signal.direction));
            if let Some(rec) = &ctx.recommendation {
                lines.extend(recommendation_lines(rec, ctx));
            }
        }
        SignalKind::Close { open_diff, .. } => {
            lines.push(format!("Opened at: {}", fmt_diff(Some(open_diff))));
            lines.push(format!("Change: {}", fmt_diff(signal.realized_delta())));
            lines.push(format!("Unwind: {}", signal.direction));
        }
    }

    lines.push(format!("Data quality: {}", signal.data_quality));
    match signal.data_quality {
        IvQuality::HistoricalVol => lines.push(
            "⚠️ Degraded data: historical volatility used in place of implied volatility".to_string(),
        ),
        IvQuality::Unavailable => {
            lines.push("⚠️ Current spread unavailable; closed on time rules".to_string())
        }
        IvQuality::Web => {}
    }
    lines.push(format!(
        "Time: {} UTC",
        signal.timestamp.format("%Y-%m-%d %H:%M:%S")
    ));

    lines.join("\n")
}

fn recommendation_lines(rec: &TradeRecommendation, ctx: &SignalContext) -> Vec<String> {
    let mut lines = vec![String::new()];
    lines.extend(straddle_lines(&rec.domestic));
    lines.push(String::new());
    lines.extend(straddle_lines(&rec.foreign));
    lines.push(String::new());
    lines.push(format!(
        "Strikes: domestic {} / foreign {}",
        rec.domestic.strike, rec.foreign.strike
    ));
    if let Some(sizing) = rec.sizing {
        lines.push(format!(
            "Hedge: {} × {} {} vs {} {} ({}%)",
            sizing.domestic_lots,
            sizing.domestic_units / Decimal::from(sizing.domestic_lots),
            escape(&ctx.domestic_unit),
            sizing.foreign_units,
            escape(&ctx.foreign_unit),
            sizing.hedge_ratio.round_dp(1)
        ));
    }
    lines.push(format!("FX hedge: {} CNH futures", rec.fx_hedge));
    lines
}

fn straddle_lines(leg: &StraddleLeg) -> Vec<String> {
    let lots = match leg.lots {
        Some(1) => " (1 lot)".to_string(),
        Some(n) => format!(" ({n} lots)"),
        None => String::new(),
    };
    vec![
        format!("<b>{} {}</b>{}", leg.action, escape(&leg.exchange), lots),
        format!("• <code>{}</code> call", escape(&leg.call)),
        format!("• <code>{}</code> put", escape(&leg.put)),
    ]
}

fn iv_line(exchange: &str, snapshot: &IvSnapshot) -> String {
    let value = snapshot
        .value
        .map(|v| format!("{:.2}%", v))
        .unwrap_or_else(|| "n/a".to_string());
    let price = snapshot
        .underlying_price
        .map(|p| format!(" @ {p}"))
        .unwrap_or_default();
    format!(
        "{} IV: {} [{}]{}",
        escape(exchange),
        value,
        snapshot.quality,
        price
    )
}

fn fmt_diff(diff: Option<Decimal>) -> String {
    diff.map(|d| format!("{:+.2} pts", d))
        .unwrap_or_else(|| "n/a".to_string())
}

/// Escape text for Telegram HTML parse mode.
pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Strip tags and unescape for plain-text resend.
pub fn to_plain(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
