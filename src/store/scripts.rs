//! Registered server-side scripts (§4.4.1–4.4.3, §4.7.3, §6)
//!
//! Each script is an idiomatic `redis::Script` (the crate's EVAL/EVALSHA
//! wrapper) rather than an embedded Lua VM — there is no teacher precedent
//! for in-process Lua in this pack, and the spec's "registered server-side
//! scripts" are atomic Redis-side operations, which is exactly what
//! `redis::Script` models.

use once_cell::sync::Lazy;
use redis::Script;

/// `circuit_breaker_exec(name, op, failure_threshold, recovery_timeout, now)
/// → [can_execute, state, event_intent]` — implements the full state machine
/// in one round trip so the transition and its event are atomic (§8's
/// circuit-breaker invariant).
pub static CIRCUIT_BREAKER_EXEC: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local name = KEYS[1]
local op = ARGV[1]
local failure_threshold = tonumber(ARGV[2])
local recovery_timeout = tonumber(ARGV[3])
local now = tonumber(ARGV[4])

local state_key = name .. ":state"
local fail_key = name .. ":failure_count"
local last_fail_key = name .. ":last_failure_time"
local half_open_key = name .. ":half_open_calls"

local state = redis.call("GET", state_key) or "closed"
local event = "no_event"

if state == "open" then
    local last_failure = tonumber(redis.call("GET", last_fail_key) or "0")
    if now - last_failure >= recovery_timeout then
        state = "half_open"
        redis.call("SET", state_key, state)
        redis.call("SET", half_open_key, "0")
        event = "state_changed_to_half_open"
    end
end

local can_execute = 0

if op == "check" then
    can_execute = (state ~= "open") and 1 or 0
elseif op == "success" then
    if state == "half_open" then
        state = "closed"
        redis.call("SET", state_key, state)
        redis.call("SET", fail_key, "0")
        redis.call("SET", half_open_key, "0")
        event = "state_changed_to_closed"
    elseif state == "closed" then
        redis.call("SET", fail_key, "0")
    end
    can_execute = 1
elseif op == "failure" then
    if state == "closed" then
        local count = redis.call("INCR", fail_key)
        redis.call("SET", last_fail_key, tostring(now))
        if count >= failure_threshold then
            state = "open"
            redis.call("SET", state_key, state)
            event = "state_changed_to_open"
        end
    elseif state == "half_open" then
        state = "open"
        redis.call("SET", state_key, state)
        redis.call("SET", last_fail_key, tostring(now))
        event = "state_changed_to_open"
    elseif state == "open" then
        redis.call("SET", last_fail_key, tostring(now))
    end
    can_execute = 1
end

return {can_execute, state, event}
"#,
    )
});

/// `rate_limit_token_bucket(name, subkey, max, per_second, now) → [allowed]`
pub static RATE_LIMIT_TOKEN_BUCKET: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local name = KEYS[1]
local subkey = ARGV[1]
local max_requests = tonumber(ARGV[2])
local per_second = tonumber(ARGV[3])
local now = tonumber(ARGV[4])

local tokens_key = name .. ":tokens:" .. subkey
local updated_key = name .. ":last_update:" .. subkey

local tokens = tonumber(redis.call("GET", tokens_key) or tostring(max_requests))
local last_update = tonumber(redis.call("GET", updated_key) or tostring(now))

local elapsed = math.max(0, now - last_update)
tokens = math.min(max_requests, tokens + elapsed * per_second)

local allowed = 0
if tokens >= 1 then
    tokens = tokens - 1
    allowed = 1
end

redis.call("SET", tokens_key, tostring(tokens))
redis.call("SET", updated_key, tostring(now))

return {allowed}
"#,
    )
});

/// `rate_limit_sliding_window(name, subkey, max, window, now) → [allowed]`
pub static RATE_LIMIT_SLIDING_WINDOW: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local name = KEYS[1]
local subkey = ARGV[1]
local max_requests = tonumber(ARGV[2])
local window = tonumber(ARGV[3])
local now = tonumber(ARGV[4])

local set_key = name .. ":sliding_window:" .. subkey

redis.call("ZREMRANGEBYSCORE", set_key, "-inf", now - window)

local count = redis.call("ZCARD", set_key)
local allowed = 0
if count < max_requests then
    redis.call("ZADD", set_key, now, now .. ":" .. math.random())
    allowed = 1
end

return {allowed}
"#,
    )
});

/// `rate_limit_fixed_window(name, subkey, max, window, now) → [allowed]`
pub static RATE_LIMIT_FIXED_WINDOW: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local name = KEYS[1]
local subkey = ARGV[1]
local max_requests = tonumber(ARGV[2])
local window = tonumber(ARGV[3])
local now = tonumber(ARGV[4])

local window_key = name .. ":fixed_window:" .. subkey
local counter_key = name .. ":counter:" .. subkey

local new_window = math.floor(now / window) * window
local stored_window = tonumber(redis.call("GET", window_key) or "0")

local allowed = 0
if stored_window < new_window then
    redis.call("SET", window_key, tostring(new_window))
    redis.call("SET", counter_key, "1")
    allowed = 1
else
    local counter = tonumber(redis.call("GET", counter_key) or "0")
    if counter < max_requests then
        redis.call("INCR", counter_key)
        allowed = 1
    end
end

return {allowed}
"#,
    )
});

/// `rate_limit_multi_dim(name, now, dim_count, [subkey, max, window]...) →
/// [allowed]` — evaluates every dimension's `ZCARD` against its own
/// `max_requests` *before* adding a member to any of them, so a rejection on
/// dimension N never leaves a phantom entry recorded against dimension
/// N-1's window. KEYS holds one sliding-window key per dimension; ARGV is
/// `now` followed by `dim_count` groups of `(subkey, max, window)`.
pub static RATE_LIMIT_MULTI_DIM: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local now = tonumber(ARGV[1])
local dim_count = tonumber(ARGV[2])

local all_pass = true
local members = {}

for i = 0, dim_count - 1 do
    local key = KEYS[i + 1]
    local subkey = ARGV[3 + i * 3]
    local max_requests = tonumber(ARGV[4 + i * 3])
    local window = tonumber(ARGV[5 + i * 3])

    redis.call("ZREMRANGEBYSCORE", key, "-inf", now - window)
    local count = redis.call("ZCARD", key)
    if count >= max_requests then
        all_pass = false
    else
        members[i + 1] = subkey .. ":" .. now .. ":" .. math.random()
    end
end

if all_pass then
    for i = 0, dim_count - 1 do
        redis.call("ZADD", KEYS[i + 1], now, members[i + 1])
    end
    return {1}
else
    return {0}
end
"#,
    )
});

/// `bulkhead_exec(name, op, max_concurrent, now) → [ok, active_calls?, total_calls?, failed_calls?]`
pub static BULKHEAD_EXEC: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local name = KEYS[1]
local op = ARGV[1]
local max_concurrent = tonumber(ARGV[2])
local now = tonumber(ARGV[3])

local active_key = name .. ":active_calls"
local total_key = name .. ":total_calls"
local failed_key = name .. ":failed_calls"
local last_call_key = name .. ":last_call_time"

redis.call("SET", last_call_key, tostring(now))

local active = tonumber(redis.call("GET", active_key) or "0")
local ok = 0

if op == "check" then
    ok = (active < max_concurrent) and 1 or 0
elseif op == "acquire" then
    if active < max_concurrent then
        active = redis.call("INCR", active_key)
        ok = 1
    end
elseif op == "release" then
    active = tonumber(redis.call("GET", active_key) or "0")
    if active > 0 then
        active = redis.call("DECR", active_key)
    end
    ok = 1
elseif op == "success" then
    redis.call("INCR", total_key)
    ok = 1
elseif op == "failure" then
    redis.call("INCR", total_key)
    redis.call("INCR", failed_key)
    ok = 1
end

local total = tonumber(redis.call("GET", total_key) or "0")
local failed = tonumber(redis.call("GET", failed_key) or "0")

return {ok, active, total, failed}
"#,
    )
});

/// `remove_tasks_by_keys(temp_set_key, queue_key) → removed_count` — takes
/// the intersection of a caller-populated temporary set of cache keys and
/// the delayed-invalidation queue, removing matched members in one round
/// trip (§4.7.3).
pub static REMOVE_TASKS_BY_KEYS: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local temp_set_key = KEYS[1]
local queue_key = KEYS[2]

local candidates = redis.call("SMEMBERS", temp_set_key)
local removed = 0

for _, member in ipairs(candidates) do
    local n = redis.call("ZREM", queue_key, member)
    removed = removed + n
end

return removed
"#,
    )
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripts_compile_their_source() {
        // `Script::new` only parses at invocation time server-side, but
        // constructing each lazily-initialized script here catches gross
        // typos in the static source strings.
        Lazy::force(&CIRCUIT_BREAKER_EXEC);
        Lazy::force(&RATE_LIMIT_TOKEN_BUCKET);
        Lazy::force(&RATE_LIMIT_SLIDING_WINDOW);
        Lazy::force(&RATE_LIMIT_FIXED_WINDOW);
        Lazy::force(&RATE_LIMIT_MULTI_DIM);
        Lazy::force(&BULKHEAD_EXEC);
        Lazy::force(&REMOVE_TASKS_BY_KEYS);
    }
}
