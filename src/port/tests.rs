use super::*;
use crate::host::LocalHost;

const TCP_TABLE: &str = "\
  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 12345 1 0000000000000000 100 0 0 10 0
   1: 0100007F:D6F3 0100007F:1F90 01 00000000:00000000 00:00000000 00000000  1000        0 23456 1 0000000000000000 20 4 30 10 -1
";

const TCP6_TABLE: &str = "\
  sl  local_address                         remote_address                        st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000000000000000000000000000:D753 00000000000000000000000000000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 34567 1 0000000000000000 100 0 0 10 0
";

#[test]
fn test_parse_port_range() {
    assert_eq!(parse_port_range("32768\t60999\n"), Some(32768..=60999));
    assert_eq!(parse_port_range("1024 65535"), Some(1024..=65535));
    assert_eq!(parse_port_range("60999 32768"), None);
    assert_eq!(parse_port_range("garbage"), None);
    assert_eq!(parse_port_range(""), None);
}

#[test]
fn test_listening_ports_only_reports_listen_state() {
    let ports = listening_ports(TCP_TABLE);
    assert!(ports.contains(&8080));
    // 0xD6F3 is an established client socket.
    assert!(!ports.contains(&0xD6F3));
    assert_eq!(ports.len(), 1);
}

#[test]
fn test_listening_ports_reads_ipv6_table() {
    let ports = listening_ports(TCP6_TABLE);
    assert_eq!(ports.into_iter().collect::<Vec<_>>(), vec![55123]);
}

#[test]
fn test_allocated_ports_are_distinct_and_outside_ephemeral_range() {
    let mut ports = PortAllocator::with_ephemeral_range(DEFAULT_EPHEMERAL_RANGE);
    let mut seen = HashSet::new();
    for _ in 0..20 {
        let port = ports.allocate().unwrap();
        assert!(port >= PORT_FLOOR);
        assert!(!DEFAULT_EPHEMERAL_RANGE.contains(&port));
        assert!(seen.insert(port), "port {} issued twice", port);
    }
    assert_eq!(ports.issued(), &seen);
}

#[test]
fn test_wide_ephemeral_range_still_yields_ports() {
    let mut ports = PortAllocator::with_ephemeral_range(1024..=u16::MAX);
    let first = ports.allocate().unwrap();
    let second = ports.allocate().unwrap();
    assert!(first >= PORT_FLOOR && second >= PORT_FLOOR);
    assert_ne!(first, second);
    assert_eq!(ports.issued().len(), 2);
}

#[test]
fn test_partial_overlap_keeps_avoiding_ephemeral_range() {
    let mut ports = PortAllocator::with_ephemeral_range(1024..=60999);
    for _ in 0..10 {
        assert!(ports.allocate().unwrap() > 60999);
    }
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_is_listening_sees_bound_listener() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    assert!(is_listening(&LocalHost::new(), port).await.unwrap());

    drop(listener);
    assert!(!is_listening(&LocalHost::new(), port).await.unwrap());
}
