use unicode_normalization::UnicodeNormalization;

/// Localized "edited" suffixes Google appends to derivative images (lowercase)
const EXTRA_FORMATS: &[&str] = &[
    "-edited",      // EN
    "-effects",     // EN
    "-smile",       // EN
    "-mix",         // EN
    "-edytowane",   // PL
    "-bearbeitet",  // DE
    "-bewerkt",     // NL
    "-編集済み",     // JA
    "-modificato",  // IT
    "-modifié",     // FR
    "-ha editado",  // ES
    "-editat",      // CA
];

/// NFC form used for every filename comparison (macOS exports are often NFD).
pub fn nfc(name: &str) -> String {
    name.nfc().collect()
}

/// Drop the last localized "edited" suffix so a derivative finds the original's sidecar.
pub fn remove_extra(filename: &str) -> String {
    let normalized = nfc(filename);
    let lowered = normalized.to_lowercase();
    // lowercasing can change byte lengths outside ASCII, only trust it when it doesn't
    if lowered.len() != normalized.len() {
        return normalized;
    }
    for extra in EXTRA_FORMATS {
        if let Some(pos) = lowered.rfind(extra) {
            let mut result = normalized.clone();
            result.replace_range(pos..pos + extra.len(), "");
            return result;
        }
    }
    normalized
}
