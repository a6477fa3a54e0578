//! Payload wire-shape contract tests
//!
//! These tests pin the serialized form of the hypercall payloads. A
//! guest built against the same major ABI version produces exactly
//! these bytes.

#[cfg(test)]
mod tests {
    use crate::test_helpers::payload_json;
    use avz_abi::{
        AbiPayload, AllocUnboundOp, BindVirqOp, CloseOp, DomainLifecycle, DomainStatusReply,
        DomctlOp, PortState, SendOp, ABI_VERSION,
    };
    use avz_types::{DomainHandle, DomainId, EvtchnPort, Virq};

    #[test]
    fn test_abi_version_is_pinned() {
        assert_eq!(ABI_VERSION.major, 1);
    }

    #[test]
    fn test_send_op_wire_shape() {
        let op = SendOp {
            port: EvtchnPort::from_index(5),
        };
        assert_eq!(payload_json(&op), r#"{"port":5}"#);
    }

    #[test]
    fn test_close_op_wire_shape() {
        let op = CloseOp {
            port: EvtchnPort::from_index(3),
        };
        assert_eq!(payload_json(&op), r#"{"port":3}"#);
    }

    #[test]
    fn test_alloc_unbound_wire_shape() {
        let op = AllocUnboundOp {
            remote_dom: DomainId::from_index(2),
        };
        assert_eq!(payload_json(&op), r#"{"remote_dom":2}"#);
    }

    #[test]
    fn test_bind_virq_wire_shape() {
        let op = BindVirqOp { virq: Virq::Timer };
        assert_eq!(payload_json(&op), r#"{"virq":"Timer"}"#);
    }

    #[test]
    fn test_domctl_unpause_wire_shape() {
        let op = DomctlOp::Unpause {
            domain: DomainId::from_index(1),
        };
        assert_eq!(payload_json(&op), r#"{"Unpause":{"domain":1}}"#);
    }

    #[test]
    fn test_port_state_tags_are_stable() {
        assert_eq!(payload_json(&PortState::Free), r#""Free""#);
        assert_eq!(
            payload_json(&PortState::Unbound {
                remote_dom: DomainId::from_index(1)
            }),
            r#"{"Unbound":{"remote_dom":1}}"#
        );
        assert_eq!(
            payload_json(&PortState::Interdomain {
                remote_dom: DomainId::from_index(2),
                remote_port: EvtchnPort::from_index(5)
            }),
            r#"{"Interdomain":{"remote_dom":2,"remote_port":5}}"#
        );
    }

    #[test]
    fn test_lifecycle_tags_are_stable() {
        for (state, tag) in [
            (DomainLifecycle::Constructing, r#""Constructing""#),
            (DomainLifecycle::Runnable, r#""Runnable""#),
            (DomainLifecycle::Blocked, r#""Blocked""#),
            (DomainLifecycle::Running, r#""Running""#),
            (DomainLifecycle::Dying, r#""Dying""#),
            (DomainLifecycle::Dead, r#""Dead""#),
        ] {
            assert_eq!(payload_json(&state), tag);
        }
    }

    #[test]
    fn test_status_reply_round_trips() {
        let reply = DomainStatusReply {
            domain: DomainId::from_index(3),
            handle: DomainHandle::new(),
            lifecycle: DomainLifecycle::Runnable,
            vcpu_count: 2,
            paused: false,
        };
        let payload = AbiPayload::new(&reply).unwrap();
        let back: DomainStatusReply = payload.deserialize().unwrap();
        assert_eq!(back, reply);
    }
}
