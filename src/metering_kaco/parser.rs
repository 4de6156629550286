use super::collector::encode_latin9;
use super::command::CommandCode;
use super::field_templates;
use super::structs::{Converter, DecodedField, DecodedRecord, FieldSpec, FieldValue};
use super::KacoError;
use log::{debug, warn};

const CHECKSUM_FIELD: &str = "checksum";

/// Removes CR, NUL and stray LF bytes from a reply line.
pub fn clean_line(line: &str) -> String {
    return line.replace(['\r', '\0', '\n'], "");
}

/// Decodes one reply line for the command whose digit was sent.
pub fn parse_line(line: &str, command: u8, verify_checksum: bool) -> Result<DecodedRecord, KacoError> {
    let line = clean_line(line);

    let command = match CommandCode::from_digit(command) {
        Some(c) => c,
        None => {
            return Err(KacoError::UnknownCommand { command: command.to_string(), line });
        }
    };

    let tokens: Vec<&str> = line.split_whitespace().collect();
    let template = field_templates::get_template(command);

    if command == CommandCode::Totals && tokens.len() == 1 {
        /* some models do not know command 3 and answer with a single token */
        debug!("Ignoring single token answer {:?} to command 3", line);
        return Ok(DecodedRecord::new());
    }

    let template: &[FieldSpec] = if command == CommandCode::Totals && tokens.len() == template.len() - 1 {
        debug!("Assuming last_command_sent is missing in {:?}", line);
        &template[1..]
    } else {
        template
    };

    if tokens.len() != template.len() {
        return Err(KacoError::FieldCountMismatch {
            line: line.clone(),
            tokens: tokens.len(),
            expected: template.len(),
        });
    }

    if verify_checksum {
        check_checksum(&line, template);
    }

    let mut ret = DecodedRecord::new();
    for (i, (spec, raw)) in template.iter().zip(tokens.iter()).enumerate() {
        let value = convert_value(spec, raw, &line)?;
        ret.insert(i, DecodedField {
            name: spec.name.to_string(),
            description: spec.description.to_string(),
            value,
        });
    }

    return Ok(ret);
}

fn convert_value(spec: &FieldSpec, raw: &str, line: &str) -> Result<FieldValue, KacoError> {
    let invalid = || KacoError::InvalidValue {
        field: spec.name.to_string(),
        raw: raw.to_string(),
        line: line.to_string(),
    };

    let value = match spec.converter {
        Some(Converter::Int) => FieldValue::Int(raw.parse::<i64>().map_err(|_| invalid())?),
        Some(Converter::Float) => FieldValue::Float(raw.parse::<f64>().map_err(|_| invalid())?),
        None => FieldValue::Text(raw.to_string()),
    };

    if is_representable(&value) {
        return Ok(value);
    }

    debug!("Value {:?} of {} is not representable, keeping printable characters", raw, spec.name);
    return Ok(FieldValue::Text(to_printable(raw)));
}

fn is_representable(value: &FieldValue) -> bool {
    match value {
        FieldValue::Int(_) => true,
        FieldValue::Float(v) => v.is_finite(),
        FieldValue::Text(s) => !s
            .chars()
            .any(|c| c == char::REPLACEMENT_CHARACTER || (c.is_control() && !is_printable_whitespace(c))),
    }
}

fn is_printable_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0b' | '\x0c')
}

/// Keeps ASCII digits, letters, punctuation and whitespace.
pub fn to_printable(value: &str) -> String {
    return value
        .chars()
        .filter(|c| c.is_ascii_graphic() || is_printable_whitespace(*c))
        .collect();
}

/* byte sum of everything in front of the checksum token, modulo 256 */
pub fn calculate_checksum(data: &str) -> Option<u8> {
    let mut sum: u8 = 0;
    for c in data.chars() {
        sum = sum.wrapping_add(encode_latin9(c)?);
    }
    return Some(sum);
}

/* None when the line carries no checkable checksum, otherwise whether it matched */
fn check_checksum(line: &str, template: &[FieldSpec]) -> Option<bool> {
    let index = template.iter().position(|f| f.name == CHECKSUM_FIELD)?;
    let (offset, token) = *token_offsets(line).get(index)?;

    let mut chars = token.chars();
    let provided = match (chars.next(), chars.next()) {
        (Some(c), None) => encode_latin9(c),
        _ => {
            debug!("Checksum {:?} is not a single character, not checking", token);
            return None;
        }
    };

    let calculated = calculate_checksum(&line[..offset]);
    if provided.is_none() || calculated != provided {
        warn!("Checksum mismatch in {:?}: calculated {:?}, received {:?}", line, calculated, provided);
        return Some(false);
    }
    return Some(true);
}

fn token_offsets(line: &str) -> Vec<(usize, &str)> {
    let mut ret = Vec::new();
    let mut start: Option<usize> = None;

    for (i, c) in line.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                ret.push((s, &line[s..i]));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }

    if let Some(s) = start {
        ret.push((s, &line[s..]));
    }
    return ret;
}

#[cfg(test)]
mod tests {
    use super::*;

    const READINGS: &str = "01 4 2205 123 830 2350 12 280 45 1234 07 PC";

    #[test]
    fn test_parse_readings_line() {
        let record = parse_line(READINGS, 0, false).unwrap();
        assert_eq!(record.len(), 12);

        let names: Vec<&str> = record.values().map(|f| f.name.as_str()).collect();
        assert_eq!(names[0], "last_command_sent");
        assert_eq!(names[11], "type");

        assert_eq!(record[&0].value, FieldValue::Text("01".to_string()));
        assert_eq!(record[&1].value, FieldValue::Int(4));
        assert_eq!(record[&2].value, FieldValue::Float(2205.0));
        assert_eq!(record[&3].value, FieldValue::Float(123.0));
        assert_eq!(record[&4].value, FieldValue::Int(830));
        assert_eq!(record[&5].value, FieldValue::Float(2350.0));
        assert_eq!(record[&7].value, FieldValue::Int(280));
        assert_eq!(record[&8].value, FieldValue::Int(45));
        assert_eq!(record[&9].value, FieldValue::Int(1234));
        assert_eq!(record[&10].value, FieldValue::Text("07".to_string()));
        assert_eq!(record[&11].value, FieldValue::Text("PC".to_string()));
        assert!(record[&1].description.starts_with("Inverter state"));
    }

    #[test]
    fn test_parse_strips_control_bytes() {
        let line = format!("\0{}\r", READINGS);
        let record = parse_line(&line, 0, false).unwrap();
        assert_eq!(record[&11].value, FieldValue::Text("PC".to_string()));
    }

    #[test]
    fn test_parse_totals_full() {
        let record = parse_line("013 3120 15300 4711 20345 07:12 12345:12 12345:12", 3, false).unwrap();
        assert_eq!(record.len(), 8);
        assert_eq!(record[&0].name, "last_command_sent");
        assert_eq!(record[&1].value, FieldValue::Float(3120.0));
        assert_eq!(record[&2].name, "e_day");
        assert_eq!(record[&3].value, FieldValue::Text("4711".to_string()));
        assert_eq!(record[&5].value, FieldValue::Text("07:12".to_string()));
    }

    #[test]
    fn test_parse_totals_without_leading_field() {
        let record = parse_line("3120 15300 4711 20345 07:12 12345:12 12345:12", 3, false).unwrap();
        assert_eq!(record.len(), 7);
        assert_eq!(record[&0].name, "p_top");
        assert_eq!(record[&0].value, FieldValue::Float(3120.0));
        assert_eq!(record[&6].name, "run_all_again");
        assert!(record.values().all(|f| f.name != "last_command_sent"));

        /* the shared template is untouched by the correction */
        let record = parse_line("013 3120 15300 4711 20345 07:12 12345:12 12345:12", 3, false).unwrap();
        assert_eq!(record[&0].name, "last_command_sent");
    }

    #[test]
    fn test_parse_totals_single_token() {
        let record = parse_line("garbage", 3, false).unwrap();
        assert!(record.is_empty());
    }

    #[test]
    fn test_readings_single_token_is_error() {
        let err = parse_line("garbage", 0, false).unwrap_err();
        assert!(matches!(err, KacoError::FieldCountMismatch { tokens: 1, expected: 12, .. }));
    }

    #[test]
    fn test_readings_missing_field_is_error() {
        let line = "4 2205 123 830 2350 12 280 45 1234 07 PC";
        match parse_line(line, 0, false) {
            Err(KacoError::FieldCountMismatch { line: raw, tokens, expected }) => {
                assert_eq!(raw, line);
                assert_eq!(tokens, 11);
                assert_eq!(expected, 12);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_totals_wrong_length_is_error() {
        let err = parse_line("1 2 3 4 5", 3, false).unwrap_err();
        assert!(matches!(err, KacoError::FieldCountMismatch { tokens: 5, expected: 8, .. }));

        let err = parse_line("1 2 3 4 5 6 7 8 9", 3, false).unwrap_err();
        assert!(matches!(err, KacoError::FieldCountMismatch { tokens: 9, expected: 8, .. }));
    }

    #[test]
    fn test_unknown_command() {
        for command in [1u8, 2, 4, 9] {
            let err = parse_line(READINGS, command, false).unwrap_err();
            assert!(matches!(err, KacoError::UnknownCommand { command: c, .. } if c == command.to_string()));
        }
        let err = parse_line("", 7, false).unwrap_err();
        assert!(err.to_string().contains("unknown command"));
    }

    #[test]
    fn test_invalid_value() {
        let line = "01 x 2205 123 830 2350 12 280 45 1234 07 PC";
        match parse_line(line, 0, false) {
            Err(KacoError::InvalidValue { field, raw, .. }) => {
                assert_eq!(field, "status");
                assert_eq!(raw, "x");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_non_representable_values() {
        let line = "01 4 2205 123 830 inf 12 280 45 1234 0\u{1}7 P\u{fffd}C";
        let record = parse_line(line, 0, false).unwrap();
        assert_eq!(record[&5].value, FieldValue::Text("inf".to_string()));
        assert_eq!(record[&10].value, FieldValue::Text("07".to_string()));
        assert_eq!(record[&11].value, FieldValue::Text("PC".to_string()));
    }

    #[test]
    fn test_latin_characters_are_kept() {
        let line = "01 4 2205 123 830 2350 12 280 45 1234 ° PC";
        let record = parse_line(line, 0, false).unwrap();
        assert_eq!(record[&10].value, FieldValue::Text("°".to_string()));
    }

    #[test]
    fn test_to_printable() {
        assert_eq!(to_printable("a\u{1}b°c d"), "abc d");
    }

    #[test]
    fn test_calculate_checksum() {
        assert_eq!(calculate_checksum("AB"), Some(0x83));
        assert_eq!(calculate_checksum(&"\u{ff}".repeat(2)), Some(0xFE));
        assert_eq!(calculate_checksum("字"), None);
    }

    #[test]
    fn test_checksum_does_not_change_output() {
        let prefix = "01 4 2205 123 830 2350 12 280 45 1234 ";
        let sum = calculate_checksum(prefix).unwrap();
        let checksum = crate::metering_kaco::collector::decode_latin9(&[sum]);
        let line = format!("{}{} PC", prefix, checksum);

        let checked = parse_line(&line, 0, true).unwrap();
        let unchecked = parse_line(&line, 0, false).unwrap();
        assert_eq!(checked, unchecked);

        let line = format!("{}X PC", prefix);
        let wrong = parse_line(&line, 0, true).unwrap();
        assert_eq!(wrong, parse_line(&line, 0, false).unwrap());
        assert_eq!(wrong[&10].value, FieldValue::Text("X".to_string()));
    }

    #[test]
    fn test_check_checksum_reports_mismatch() {
        let prefix = "01 4 2205 123 830 2350 12 280 45 1234 ";
        let sum = calculate_checksum(prefix).unwrap();
        let good = format!("{}{} PC", prefix, crate::metering_kaco::collector::decode_latin9(&[sum]));
        let template = field_templates::get_template(CommandCode::Readings);

        assert_eq!(check_checksum(&good, template), Some(true));
        assert_eq!(check_checksum(&format!("{}X PC", prefix), template), Some(false));
        assert_eq!(check_checksum(&format!("{}07 PC", prefix), template), None);
        assert_eq!(check_checksum("013 3120 15300 4711 20345 07:12 1:12 1:12", field_templates::get_template(CommandCode::Totals)), None);
    }

    #[test]
    fn test_token_offsets() {
        assert_eq!(token_offsets("  a bc\td "), vec![(2, "a"), (4, "bc"), (7, "d")]);
        assert!(token_offsets("   ").is_empty());
    }
}
