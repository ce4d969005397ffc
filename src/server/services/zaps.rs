/// BOLT-11 amount extraction for zap receipts. Decoding failures are
/// non-fatal by design: the router records the zap with amount 0 and flags
/// the metadata.
///
/// The human-readable part before the last `1` separator is
/// `ln<network><amount><multiplier>`, with the amount denominated in BTC
/// and scaled by `m`/`u`/`n`/`p`. The data part never contains `1`, so the
/// separator is unambiguous.
pub fn invoice_amount_sats(invoice: &str) -> Option<u64> {
    let lower = invoice.trim().to_ascii_lowercase();
    let separator = lower.rfind('1')?;
    let hrp = &lower[..separator];

    let amount_part = hrp
        .strip_prefix("lnbcrt")
        .or_else(|| hrp.strip_prefix("lntbs"))
        .or_else(|| hrp.strip_prefix("lntb"))
        .or_else(|| hrp.strip_prefix("lnbc"))?;

    if amount_part.is_empty() {
        // Amountless invoice.
        return None;
    }

    let digits: String = amount_part
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;
    let tail = &amount_part[digits.len()..];

    // Sats = amount in BTC * 1e8, scaled by the multiplier.
    match tail {
        "" => amount.checked_mul(100_000_000),
        "m" => amount.checked_mul(100_000),
        "u" => amount.checked_mul(100),
        "n" => {
            if amount % 10 != 0 {
                return None;
            }
            Some(amount / 10)
        }
        "p" => {
            if amount % 10_000 != 0 {
                return None;
            }
            Some(amount / 10_000)
        }
        _ => None,
    }
}
