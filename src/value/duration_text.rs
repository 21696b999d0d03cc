//! Duration text grammar (spec §4.7/§9): two accepted forms, an
//! ISO-8601-like `PT2H46M39S` and a human `2h 46m 39s`. Isolated as its
//! own recursive-descent parser/formatter pair so the malformed-input
//! edge cases can be tested without dragging in the rest of the codec.

use crate::error::ClientError;

type Result<T> = std::result::Result<T, ClientError>;

/// Parses either grammar into a microsecond count.
pub fn parse_duration_micros(text: &str) -> Result<i64> {
  let trimmed = text.trim();
  if let Some(rest) = trimmed.strip_prefix("PT").or_else(|| trimmed.strip_prefix("pt")) {
    parse_iso(rest)
  } else if let Some(rest) = trimmed.strip_prefix('P').or_else(|| trimmed.strip_prefix('p')) {
    parse_iso(rest)
  } else {
    parse_human(trimmed)
  }
}

/// Formats a microsecond count back into the canonical `PT...` form.
/// `0` formats as `PT0S`.
pub fn format_duration_micros(micros: i64) -> String {
  if micros == 0 {
    return "PT0S".to_string();
  }

  let sign = if micros < 0 { "-" } else { "" };
  let total = micros.unsigned_abs();
  let hours = total / 3_600_000_000;
  let rem = total % 3_600_000_000;
  let minutes = rem / 60_000_000;
  let rem = rem % 60_000_000;
  let seconds = rem / 1_000_000;
  let micro_rem = rem % 1_000_000;

  let mut out = format!("{sign}PT");
  if hours > 0 {
    out.push_str(&format!("{hours}H"));
  }
  if minutes > 0 {
    out.push_str(&format!("{minutes}M"));
  }
  if seconds > 0 || micro_rem > 0 || (hours == 0 && minutes == 0) {
    if micro_rem > 0 {
      let frac = format!("{micro_rem:06}");
      let frac = frac.trim_end_matches('0');
      out.push_str(&format!("{seconds}.{frac}S"));
    } else {
      out.push_str(&format!("{seconds}S"));
    }
  }
  out
}

/// `rest` is the text following `P`/`PT`: a run of `<number><unit>` pairs
/// over units `H`, `M`, `S` (seconds may carry a fractional part).
fn parse_iso(rest: &str) -> Result<i64> {
  if rest.is_empty() {
    return Err(fmt_err("empty ISO-8601 duration"));
  }

  let mut micros: i64 = 0;
  let mut chars = rest.chars().peekable();

  while chars.peek().is_some() {
    let (sign, _has_sign, number) = take_signed_number(&mut chars)?;
    let unit = chars
      .next()
      .ok_or_else(|| fmt_err("ISO-8601 duration component missing a unit"))?;

    let component_micros = match unit {
      'H' | 'h' => scale_to_micros(sign, &number, 3_600_000_000)?,
      'M' | 'm' => scale_to_micros(sign, &number, 60_000_000)?,
      'S' | 's' => scale_to_micros(sign, &number, 1_000_000)?,
      other => return Err(fmt_err(&format!("unknown ISO-8601 duration unit '{other}'"))),
    };
    micros += component_micros;
  }

  Ok(micros)
}

/// `2h 46m 39s`, `500ms`, `1.5 seconds` — a whitespace-separated run of
/// `<number><unit-word>` pairs. A leading sign is only legal on a literal
/// with an integer part; `"-0.5second"` is rejected.
fn parse_human(text: &str) -> Result<i64> {
  if text.is_empty() {
    return Err(fmt_err("empty duration"));
  }

  let mut micros: i64 = 0;
  let mut rest = text;

  while !rest.is_empty() {
    rest = rest.trim_start();
    if rest.is_empty() {
      break;
    }

    let mut chars = rest.chars().peekable();
    let (sign, has_sign, number) = take_signed_number(&mut chars)?;
    if has_sign && number.contains('.') {
      return Err(fmt_err("leading sign on a fractional-only literal is disallowed"));
    }

    let consumed_number = rest.len() - chars.clone().collect::<String>().len();
    let after_number = &rest[consumed_number..];
    let after_number = after_number.trim_start();

    let unit_len = after_number
      .find(|c: char| c.is_ascii_digit() || c == '-' || c == '+' || c.is_whitespace())
      .unwrap_or(after_number.len());
    let unit = &after_number[..unit_len];
    if unit.is_empty() {
      return Err(fmt_err("duration component missing a unit"));
    }

    let scale = match unit.to_ascii_lowercase().as_str() {
      "h" | "hr" | "hrs" | "hour" | "hours" => 3_600_000_000,
      "m" | "min" | "mins" | "minute" | "minutes" => 60_000_000,
      "s" | "sec" | "secs" | "second" | "seconds" => 1_000_000,
      "ms" | "millisecond" | "milliseconds" => 1_000,
      "us" | "microsecond" | "microseconds" => 1,
      other => return Err(fmt_err(&format!("unknown duration unit '{other}'"))),
    };

    micros += scale_to_micros(sign, &number, scale)?;
    rest = &after_number[unit_len..];
  }

  Ok(micros)
}

/// Consumes an optional leading `+`/`-`, then a run of digits with at
/// most one decimal point, returning `(sign, digits-and-dot)`.
fn take_signed_number(chars: &mut std::iter::Peekable<std::str::Chars>) -> Result<(i64, bool, String)> {
  let mut sign = 1i64;
  let mut has_sign = false;
  if let Some(&c) = chars.peek() {
    if c == '-' {
      sign = -1;
      has_sign = true;
      chars.next();
    } else if c == '+' {
      has_sign = true;
      chars.next();
    }
  }

  let mut number = String::new();
  let mut seen_dot = false;
  while let Some(&c) = chars.peek() {
    if c.is_ascii_digit() {
      number.push(c);
      chars.next();
    } else if c == '.' && !seen_dot {
      seen_dot = true;
      number.push(c);
      chars.next();
    } else {
      break;
    }
  }

  if number.is_empty() || number == "." {
    return Err(fmt_err("expected a number in duration literal"));
  }

  Ok((sign, has_sign, number))
}

fn scale_to_micros(sign: i64, number: &str, scale: i64) -> Result<i64> {
  if let Some(dot) = number.find('.') {
    let whole: i64 = if dot == 0 { 0 } else { number[..dot].parse().map_err(|_| fmt_err("bad integer part"))? };
    let frac_str = &number[dot + 1..];
    let frac_micros = if frac_str.is_empty() {
      0
    } else {
      let padded: String = frac_str.chars().chain(std::iter::repeat('0')).take(6.max(frac_str.len())).collect();
      let numerator: i64 = padded[..6.max(frac_str.len())].parse().map_err(|_| fmt_err("bad fractional part"))?;
      let scale_down = 10i64.pow((padded.len() - 6) as u32).max(1);
      numerator / scale_down
    };
    Ok(sign * (whole * scale + frac_micros * (scale / 1_000_000).max(1)))
  } else {
    let whole: i64 = number.parse().map_err(|_| fmt_err("bad integer part"))?;
    Ok(sign * whole * scale)
  }
}

fn fmt_err(message: &str) -> ClientError {
  ClientError::ArgumentInvalid {
    path: "duration".to_string(),
    reason: message.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn iso_round_trips() {
    let micros = parse_duration_micros("PT2H46M39S").unwrap();
    assert_eq!(micros, 9_999 * 1_000_000);
    assert_eq!(format_duration_micros(micros), "PT2H46M39S");
  }

  #[test]
  fn zero_formats_as_pt0s() {
    assert_eq!(format_duration_micros(0), "PT0S");
  }

  #[test]
  fn human_form_parses() {
    let micros = parse_duration_micros("2h 46m 39s").unwrap();
    assert_eq!(micros, 9_999 * 1_000_000);
  }

  #[test]
  fn leading_sign_on_fractional_only_literal_is_rejected() {
    assert!(parse_duration_micros("-0.5second").is_err());
  }

  #[test]
  fn bare_decimal_point_is_rejected() {
    assert!(parse_duration_micros("PT.S").is_err());
  }

  #[test]
  fn unit_clash_with_non_unit_word_is_rejected() {
    assert!(parse_duration_micros("3 bananas").is_err());
  }

  #[test]
  fn missing_unit_is_rejected() {
    assert!(parse_duration_micros("PT5").is_err());
  }
}
