// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Askpass prompt routing specs.

use mux_ssh::askpass::{classify_prompt, PromptKind};

/// Spec: "continue connecting" prompts route through host-key
/// verification; everything else is a credential prompt.
#[test]
fn host_key_and_credential_prompts_route_apart() {
    let host_key = "The authenticity of host 'dev.example (10.0.0.7)' can't be established.\n\
                    ED25519 key fingerprint is SHA256:AbCdEf0123456789.\n\
                    Are you sure you want to continue connecting (yes/no/[fingerprint])?";
    match classify_prompt(host_key) {
        PromptKind::HostKey(parsed) => {
            assert_eq!(parsed.host, "dev.example");
            assert_eq!(parsed.key_type, "ED25519");
            assert_eq!(parsed.fingerprint, "SHA256:AbCdEf0123456789");
        }
        other => panic!("expected host-key classification, got {other:?}"),
    }

    let credential = "Enter passphrase for key '/home/u/.ssh/id_ed25519':";
    assert_eq!(classify_prompt(credential), PromptKind::Credential);
}

#[test]
fn unparseable_host_key_prompts_degrade_to_unknown_fields() {
    match classify_prompt("please CONTINUE CONNECTING now") {
        PromptKind::HostKey(parsed) => {
            assert_eq!(parsed.host, "unknown");
            assert_eq!(parsed.key_type, "unknown");
            assert_eq!(parsed.fingerprint, "unknown");
        }
        other => panic!("expected host-key classification, got {other:?}"),
    }
}
