#![no_main]

use libfuzzer_sys::fuzz_target;

use pollcast::polls::{TallyStore, VotePolicy};

const OPTIONS: [&str; 4] = ["Red", "Blue", "Green", "Yellow"];

fuzz_target!(|data: &[u8]| {
    // First byte picks the policy; each following byte is one vote:
    // high nibble = voter, low nibble = option (values past the end are
    // unknown options and must be rejected without changing anything).
    let Some((&policy, votes)) = data.split_first() else {
        return;
    };
    let policy = if policy & 1 == 0 {
        VotePolicy::Single
    } else {
        VotePolicy::Multiple
    };
    let options: Vec<String> = OPTIONS.iter().map(|s| s.to_string()).collect();

    let mut store = TallyStore::new();
    store.initialize(&options, policy).unwrap();

    for byte in votes {
        let voter = format!("v{}", byte >> 4);
        let index = (byte & 0x0f) as usize;
        let before = store.total();

        match options.get(index) {
            Some(option) => {
                let outcome = store.apply_vote(option, &voter).unwrap();
                assert_eq!(outcome.total, store.total());
                if policy == VotePolicy::Single {
                    assert!(outcome.selection.len() <= 1);
                }
                assert!(outcome.total.abs_diff(before) <= 1);
            }
            None => {
                assert!(store.apply_vote("Purple", &voter).is_err());
                assert_eq!(store.total(), before);
            }
        }
        assert!(store.is_consistent());
    }
});
