/// Splits `line` on commas and trims every piece.
pub fn tokens(line: &str) -> Vec<&str> {
    line.split(',').map(str::trim).collect()
}

/// Expands a register list such as `R1-R5,R8` (or `R1-5`) into names.
pub fn expand_register_list(list: &str) -> Result<Vec<String>, String> {
    let mut regs = Vec::new();

    for token in tokens(list) {
        if token.is_empty() {
            continue;
        }

        match token.split_once('-') {
            Some((first, last)) => {
                let (prefix, start) = split_numbered(first.trim())
                    .ok_or_else(|| format!("invalid register range start: '{token}'"))?;
                let last = last.trim();
                let end = match split_numbered(last) {
                    Some((end_prefix, end)) if end_prefix.is_empty() || end_prefix == prefix => end,
                    _ => return Err(format!("invalid register range end: '{token}'")),
                };
                if end < start {
                    return Err(format!("empty register range: '{token}'"));
                }
                regs.extend((start..=end).map(|i| format!("{prefix}{i}")));
            }
            None => regs.push(token.to_owned()),
        }
    }

    Ok(regs)
}

/// `R12` -> (`R`, 12)
fn split_numbered(s: &str) -> Option<(&str, u32)> {
    let digits = s.find(|c: char| c.is_ascii_digit())?;
    let (prefix, num) = s.split_at(digits);
    if !prefix.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    num.parse().ok().map(|n| (prefix, n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens() {
        assert_eq!(tokens(" LD , 5,Load "), vec!["LD", "5", "Load"]);
    }

    #[test]
    fn test_expand_register_list() {
        assert_eq!(
            expand_register_list("R1-R3, R8").unwrap(),
            vec!["R1", "R2", "R3", "R8"]
        );
        assert_eq!(expand_register_list("F2-4").unwrap(), vec!["F2", "F3", "F4"]);
        assert_eq!(expand_register_list("R5").unwrap(), vec!["R5"]);
        assert_eq!(expand_register_list("R7-R7").unwrap(), vec!["R7"]);

        assert!(expand_register_list("R5-R2").is_err());
        assert!(expand_register_list("R1-F3").is_err());
        assert!(expand_register_list("R1-").is_err());
    }
}
