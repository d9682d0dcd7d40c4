// Layout of the packed counter word: strong count in the upper bits, one
// flag bit marking "a weak node exists for this object".
pub const WEAK_FLAG: u32 = 1;
pub const STRONG_UNIT: u32 = 2;

// Compare-exchange retry budget when promoting a weak handle. Exhausting it
// is treated as "assume not alive" -- an approximation, not a proof. Raising
// it trades longer spins for fewer spurious failures under contention;
// removing the bound entirely would risk livelock against a retain/release
// storm, so the loop stays bounded.
pub const PROMOTE_RETRY_LIMIT: usize = 10;
