//! Job name conventions.

/// Name prefix of jobs served by the ephemeral cluster scheduler.
pub const EPHEMERAL_JOB_PREFIX: &str = "ephemeralcluster-";

const REHEARSAL_PREFIX: &str = "rehearse-";

pub fn is_ephemeral_job(name: &str) -> bool {
    name.starts_with(EPHEMERAL_JOB_PREFIX)
}

/// Strip a `rehearse-<digits>-` prefix, returning the production job name.
pub fn normalize_job_name(name: &str) -> &str {
    let Some(rest) = name.strip_prefix(REHEARSAL_PREFIX) else {
        return name;
    };
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return name;
    }
    match rest[digits..].strip_prefix('-') {
        Some(job) => job,
        None => name,
    }
}
