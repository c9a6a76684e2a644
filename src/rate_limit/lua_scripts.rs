/// Lua script for per-minute fixed window counting in Redis
///
/// The caller embeds the window index in the key, so each window gets a
/// fresh counter. The key expires when its window ends, so the TTL is the
/// time a throttled client has to wait.
///
/// KEYS[1] = the window key
/// ARGV[1] = maximum requests
/// ARGV[2] = seconds until the window ends
///
/// Returns: [allowed (0/1), current count, ttl (seconds)]
pub const ALLOW_MINUTE_SCRIPT: &str = r#"
local key = KEYS[1]
local max_requests = tonumber(ARGV[1])
local remaining = tonumber(ARGV[2])

local current = redis.call('INCR', key)

local ttl = redis.call('TTL', key)
if current == 1 or ttl < 0 then
    -- New window, or the key lost its expiry
    redis.call('EXPIRE', key, remaining)
    ttl = remaining
end

local allowed = 0
if current <= max_requests then
    allowed = 1
end

return {allowed, current, ttl}
"#;
