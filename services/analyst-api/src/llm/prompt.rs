use crate::analysis::{MarketAnalysis, SwingPoint};
use market_data::sources::oanda::OANDA_INSTRUMENTS;
use market_data::{Granularity, Instrument};
use rust_decimal::Decimal;
use std::fmt::Write;

pub const SYSTEM_PROMPT: &str = "You are an expert trading analyst specializing in Fibonacci \
retracement strategies on gold and major currency pairs. Give precise analysis with exact price \
levels and clear reasoning, grounded in the Fibonacci OTE strategy, and double-check every \
calculation. Use clear headings and sections so the plan is easy to follow.";

const STRATEGY_RULES: &str = "
Strategy Rules:
For Bullish Trend:
- Draw Fibonacci from the last significant low to the last high
- Enter a buy limit at the 0.705 Fibonacci level (OTE zone)
- Place the stop loss 3 pips below the last significant low
- TP1 at 1:1 risk-reward, TP2 at the swing high

For Bearish Trend:
- Draw Fibonacci from the last significant high to the last low
- Enter a sell limit at the 0.705 Fibonacci level (OTE zone)
- Place the stop loss 3 pips above the last significant high
- TP1 at 1:1 risk-reward, TP2 at the swing low

Please provide:
1. An assessment of the current trend, including any break of structure (BOS) or change of character (CHoCH)
2. Which swing points should anchor the Fibonacci drawing
3. The OTE zone (61.8% to 78.6% retracement)
4. The exact entry price at the 0.705 level
5. Stop loss and take profit levels with their pip distances
6. Warnings or special considerations for this setup
7. A confidence rating from 1 to 10 for this opportunity

Support the analysis with specific price levels and clear reasoning.
";

fn money(value: Decimal) -> String {
    format!("${:.2}", value)
}

fn swing_list(points: &[SwingPoint]) -> String {
    if points.is_empty() {
        return "none detected".to_string();
    }
    points
        .iter()
        .map(|p| format!("{} at {}", money(p.price), p.time.format("%Y-%m-%d %H:%M:%S")))
        .collect::<Vec<_>>()
        .join(", ")
}

/// User prompt describing the current setup for the LLM
pub fn build_strategy_prompt(
    instrument: &Instrument,
    granularity: Granularity,
    analysis: &MarketAnalysis,
) -> String {
    let trend = &analysis.trend;
    let name = match OANDA_INSTRUMENTS.get(instrument.as_str()) {
        Some(display) => format!("{} ({})", instrument.display_symbol(), display),
        None => instrument.display_symbol(),
    };

    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "As a professional trading analyst, analyze the following {} market data and explain \
         the current setup according to the Fibonacci OTE strategy.",
        name
    );
    let _ = writeln!(prompt, "\nCurrent Market Information:");
    let _ = writeln!(prompt, "- Timeframe: {}", granularity.describe());
    let _ = writeln!(prompt, "- Current Price: {}", money(trend.current_price));
    let _ = writeln!(
        prompt,
        "- Identified Trend: {:?} ({:?})",
        trend.direction, trend.strength
    );
    if let Some(sma) = trend.sma_short {
        let _ = writeln!(prompt, "- 20-period SMA: {}", money(sma));
    }
    if let Some(sma) = trend.sma_long {
        let _ = writeln!(prompt, "- 50-period SMA: {}", money(sma));
    }

    let _ = writeln!(prompt, "\nRecent Structure Points:");
    let _ = writeln!(prompt, "- Swing Highs: {}", swing_list(&analysis.structure.swing_highs));
    let _ = writeln!(prompt, "- Swing Lows: {}", swing_list(&analysis.structure.swing_lows));

    if let Some(ote) = &analysis.ote {
        let _ = writeln!(prompt, "\nPre-calculated Fibonacci Levels:");
        let _ = writeln!(prompt, "- Entry Price (0.705 Fib): {}", money(ote.entry_price));
        let _ = writeln!(
            prompt,
            "- OTE Zone: {} to {}",
            money(ote.zone_start),
            money(ote.zone_end)
        );
        let _ = writeln!(prompt, "- Stop Loss: {}", money(ote.stop_loss));
        let _ = writeln!(prompt, "- Take Profit 1 (1:1 RR): {}", money(ote.take_profit_1));
        let _ = writeln!(prompt, "- Take Profit 2 (Swing): {}", money(ote.take_profit_2));
    }

    prompt.push_str(STRATEGY_RULES);
    prompt
}
