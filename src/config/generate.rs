pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# PUBSUB ARCHIVE CONFIGURATION
# =============================================================================
# Event bus -> delivery stream -> partitioned object storage.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/pubsub/config.yml
#   3. /etc/pubsub/config.yml
#
# Any value may reference environment variables with $env{...}.

# =============================================================================
# STACK
# =============================================================================
# Identity used to build resource identifiers and tags.

stack:
  name: PubSub-Sandbox
  account: "111111111111"
  region: us-east-1

# =============================================================================
# INGRESS (event bus)
# =============================================================================

ingress:
  listen: 127.0.0.1:7200
  bus_name: pubsub-events
  backpressure:
    # 'reject' fails immediately when the buffer is full,
    # 'block' waits up to max_wait before rejecting
    strategy: block
    queue_capacity: 10000
    max_wait: 1s
  # Only matching events are accepted. An empty account list means the
  # stack's own account.
  pattern:
    accounts: []
  max_entries_per_request: 10

# =============================================================================
# DELIVERY STREAM
# =============================================================================

stream:
  name: s3-delivery-stream
  buffer:
    # A batch is sealed when either threshold is reached, whichever comes first
    max_buffer_bytes: 64MiB
    max_buffer_interval: 60s
    sealed_capacity: 16
  processing:
    # Split client-side aggregated direct-put records into JSON sub-records
    deaggregation: true
    delimiter: "\n"
    # Fields extracted from each record for partitioning
    metadata_query: '{source:.source,detail_type:."detail-type"}'
  # Placeholders: {key:<field>}, {yyyy}, {MM}, {dd}, {HH}, {error_type}
  prefix: "{key:source}/{key:detail_type}/date={yyyy}-{MM}-{dd}/"
  error_prefix: "errors/{error_type}/date={yyyy}-{MM}-{dd}/"

# =============================================================================
# WRITER
# =============================================================================

writer:
  workers: 4
  transform_concurrency: 4
  # Total time a single object write may spend retrying
  retry_duration: 10s
  initial_backoff: 100ms
  max_backoff: 2s
  # How long shutdown waits for in-flight writes before abandoning them
  shutdown_grace: 15s

# =============================================================================
# STORAGE
# =============================================================================

storage:
  path: /var/lib/pubsub/bucket
  bucket_name: pubsub-events
  notification_capacity: 1024

# =============================================================================
# ARCHIVE (optional)
# =============================================================================

archive:
  path: /var/lib/pubsub/archive
  retention: 90days
  prune_interval: 1h

# =============================================================================
# SCHEMA DISCOVERY
# =============================================================================

schemas:
  discovery: true

# =============================================================================
# PARAMETER EXPORT (optional)
# =============================================================================

parameters:
  path: /var/lib/pubsub/parameters.yml

# Extra resource tags (owner, repo and stack are always present)
tags: {}
"#
    .to_string()
}
