//! Routing-identifier (JID) helpers.

/// Domain suffix for direct-message JIDs.
pub const JID_SUFFIX: &str = "@s.whatsapp.net";

/// Normalize a phone number into a full routing identifier.
///
/// Already-suffixed input passes through unchanged. A leading `+` is
/// stripped and the rest used as-is; otherwise the default country code is
/// prepended after stripping a leading `0`.
pub fn to_jid(phone: &str, default_country_code: &str) -> String {
    if phone.ends_with(JID_SUFFIX) {
        return phone.to_string();
    }
    if let Some(international) = phone.strip_prefix('+') {
        return format!("{international}{JID_SUFFIX}");
    }
    let local = phone.strip_prefix('0').unwrap_or(phone);
    format!("{default_country_code}{local}{JID_SUFFIX}")
}

/// Bare phone number of a JID: everything before the `@`.
pub fn bare_number(jid: &str) -> &str {
    jid.split('@').next().unwrap_or(jid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn international_number_drops_the_plus() {
        assert_eq!(to_jid("+15551234567", "212"), "15551234567@s.whatsapp.net");
    }

    #[test]
    fn local_number_gets_the_default_country_code() {
        assert_eq!(to_jid("0612345678", "212"), "212612345678@s.whatsapp.net");
    }

    #[test]
    fn local_number_without_leading_zero() {
        assert_eq!(to_jid("612345678", "212"), "212612345678@s.whatsapp.net");
    }

    #[test]
    fn suffixed_jid_passes_through() {
        assert_eq!(
            to_jid("15551234567@s.whatsapp.net", "212"),
            "15551234567@s.whatsapp.net"
        );
    }

    #[test]
    fn bare_number_strips_the_suffix() {
        assert_eq!(bare_number("15551234567@s.whatsapp.net"), "15551234567");
        assert_eq!(bare_number("15551234567"), "15551234567");
    }
}
