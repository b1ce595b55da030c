/// Constants for metric operation names to ensure consistency and prevent typos
//
// Provisioning stages
pub const OP_ENGINE_LOAD: &str = "engine_load";
pub const OP_KEYGEN: &str = "keygen";
pub const OP_SERIALIZE_PK: &str = "serialize_public_key";
pub const OP_REGISTER: &str = "register";
// Whole workflow
pub const OP_PROVISION: &str = "provision";

// Other client commands
pub const OP_FETCH_CRYPTO_CONTEXT: &str = "fetch_crypto_context";
pub const OP_EXPORT_ENGINE: &str = "export_engine";

// Common metric tag keys
pub const TAG_OPERATION: &str = "operation";
pub const TAG_ERROR: &str = "error";
pub const TAG_ENGINE_SOURCE: &str = "engine_source";
pub const TAG_STATUS: &str = "status";

// Common error values
pub const ERR_ENGINE_LOAD: &str = "engine_load_failed";
pub const ERR_CRYPTO: &str = "crypto_operation_failed";
pub const ERR_NETWORK: &str = "network_error";
pub const ERR_SERVER_REJECTION: &str = "server_rejection";
pub const ERR_MALFORMED_RESPONSE: &str = "malformed_response";
pub const ERR_ENCODING: &str = "encoding_error";
pub const ERR_IN_PROGRESS: &str = "in_progress";
