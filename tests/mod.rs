
// This file organizes the integration tests into a cohesive test suite.
// Each module tests a specific aspect of the application:
// - smoke_tests: Basic functionality tests to ensure nothing is broken
// - calendar_mock: Mocking the room calendar and driving the scheduler actor
// - reconcile_tests: Reconciliation passes against an in-memory timer store
// - redis_mock: Mocking Redis for testing without a real Redis instance
